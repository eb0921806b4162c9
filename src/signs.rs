///! Exit-sign extraction and highway ref merging
///!
///! Pure text analyzers over way/node attributes: merging relation
///! directions into way refs, and assembling the exit sign list (number,
///! branch, toward, name) attached to driveable ramp edges.

use crate::formats::names::NameData;
use crate::formats::way::Way;
use crate::formats::way_node::OsmNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignType {
    ExitNumber = 0,
    ExitBranch = 1,
    ExitToward = 2,
    ExitName = 3,
}

impl SignType {
    pub fn from_u8(value: u8) -> SignType {
        match value {
            0 => SignType::ExitNumber,
            1 => SignType::ExitBranch,
            2 => SignType::ExitToward,
            _ => SignType::ExitName,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sign {
    pub sign_type: SignType,
    pub text: String,
}

impl Sign {
    pub fn new(sign_type: SignType, text: impl Into<String>) -> Self {
        Sign {
            sign_type,
            text: text.into(),
        }
    }
}

/// Split a semicolon-separated tag value into its tokens
pub fn tag_tokens(value: &str) -> Vec<&str> {
    split_tokens(value, ';')
}

fn split_tokens(value: &str, separator: char) -> Vec<&str> {
    value.split(separator).filter(|t| !t.is_empty()).collect()
}

/// Merge relation `REF|DIR` pairs into a way's semicolon-separated refs.
/// The way's ref order wins; refs without a matching pair pass through bare.
pub fn get_ref(way_ref: &str, relation_ref: &str) -> String {
    let refdirs = tag_tokens(relation_ref);
    let mut refs = String::new();
    for way in tag_tokens(way_ref) {
        let mut merged: Option<String> = None;
        for refdir in &refdirs {
            let pair = split_tokens(refdir, '|');
            if pair.len() == 2 && pair[0] == way {
                merged = Some(format!("{} {}", way, pair[1]));
                break;
            }
        }
        if !refs.is_empty() {
            refs.push(';');
        }
        refs.push_str(&merged.unwrap_or_else(|| way.to_string()));
    }
    refs
}

/// Assemble the exit sign list for one (node, way) pairing. Node-level
/// exit_to text is only consulted when the way carries no branch or toward
/// information of its own.
pub fn exit_sign_list(node: &OsmNode, way: &Way, names: &NameData) -> Vec<Sign> {
    let mut signs = Vec::new();

    // NUMBER
    if way.junction_ref_index != 0 {
        signs.push(Sign::new(
            SignType::ExitNumber,
            names.ref_table.name(way.junction_ref_index),
        ));
    } else if node.has_ref {
        if let Some(node_ref) = names.node_ref.get(&node.osmid) {
            signs.push(Sign::new(SignType::ExitNumber, node_ref.clone()));
        }
    }

    // BRANCH
    let mut has_branch = false;
    if way.destination_ref_index != 0 {
        has_branch = true;
        for branch_ref in tag_tokens(names.ref_table.name(way.destination_ref_index)) {
            signs.push(Sign::new(SignType::ExitBranch, branch_ref));
        }
    }
    if way.destination_street_index != 0 {
        has_branch = true;
        for branch_street in tag_tokens(names.name_table.name(way.destination_street_index)) {
            signs.push(Sign::new(SignType::ExitBranch, branch_street));
        }
    }

    // TOWARD
    let mut has_toward = false;
    if way.destination_ref_to_index != 0 {
        has_toward = true;
        for toward_ref in tag_tokens(names.ref_table.name(way.destination_ref_to_index)) {
            signs.push(Sign::new(SignType::ExitToward, toward_ref));
        }
    }
    if way.destination_street_to_index != 0 {
        has_toward = true;
        for toward_street in tag_tokens(names.name_table.name(way.destination_street_to_index)) {
            signs.push(Sign::new(SignType::ExitToward, toward_street));
        }
    }
    if way.destination_index != 0 {
        has_toward = true;
        for toward in tag_tokens(names.name_table.name(way.destination_index)) {
            signs.push(Sign::new(SignType::ExitToward, toward));
        }
    }

    // exit_to is a fallback for ways that sign nothing themselves
    if !has_branch && !has_toward && node.has_exit_to {
        if let Some(exit_to) = names.node_exit_to.get(&node.osmid) {
            for token in tag_tokens(exit_to) {
                parse_exit_to(token, &mut signs);
            }
        }
    }

    // NAME
    if node.has_name {
        if let Some(node_name) = names.node_name.get(&node.osmid) {
            for name in tag_tokens(node_name) {
                signs.push(Sign::new(SignType::ExitName, name));
            }
        }
    }

    signs
}

/// Interpret one exit_to token. "To X" / "Toward X" prefixes strip to a
/// toward sign; a single "A to B" / "A toward B" infix splits into branch
/// and toward; anything else is a toward sign as-is.
fn parse_exit_to(token: &str, signs: &mut Vec<Sign>) {
    // ASCII lowering keeps byte offsets valid on the original token
    let lower = token.to_ascii_lowercase();

    if lower.starts_with("to ") {
        signs.push(Sign::new(SignType::ExitToward, &token[3..]));
        return;
    }
    if lower.starts_with("toward ") {
        signs.push(Sign::new(SignType::ExitToward, &token[7..]));
        return;
    }

    if let Some(found) = lower.find(" to ") {
        if lower[found + 4..].find(" to ").is_none() && !lower.contains(" toward ") {
            signs.push(Sign::new(SignType::ExitBranch, &token[..found]));
            signs.push(Sign::new(SignType::ExitToward, &token[found + 4..]));
            return;
        }
    }

    if let Some(found) = lower.find(" toward ") {
        if lower[found + 8..].find(" toward ").is_none() && !lower.contains(" to ") {
            signs.push(Sign::new(SignType::ExitBranch, &token[..found]));
            signs.push(Sign::new(SignType::ExitToward, &token[found + 8..]));
            return;
        }
    }

    signs.push(Sign::new(SignType::ExitToward, token));
}
