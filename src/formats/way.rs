///! Way records - per-way routing attributes from the upstream parser
///!
///! Fixed 52-byte records stored in a raw `Sequence` file (ways.bin). String
///! attributes live in the name archive; a way carries u32 indices into its
///! two string tables, 0 meaning "absent".

use crate::sequence::Record;

/// Road classification, 0 = most important
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum RoadClass {
    Motorway = 0,
    Trunk = 1,
    Primary = 2,
    Secondary = 3,
    Tertiary = 4,
    Unclassified = 5,
    Residential = 6,
    #[default]
    ServiceOther = 7,
}

impl RoadClass {
    pub fn from_u8(value: u8) -> RoadClass {
        match value {
            0 => RoadClass::Motorway,
            1 => RoadClass::Trunk,
            2 => RoadClass::Primary,
            3 => RoadClass::Secondary,
            4 => RoadClass::Tertiary,
            5 => RoadClass::Unclassified,
            6 => RoadClass::Residential,
            _ => RoadClass::ServiceOther,
        }
    }
}

/// What an edge is used as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Use {
    #[default]
    Road = 0,
    Ramp = 1,
    TurnChannel = 2,
    Track = 3,
    Driveway = 4,
    Alley = 5,
    ParkingAisle = 6,
    Culdesac = 7,
    Other = 8,
}

impl Use {
    pub fn from_u8(value: u8) -> Use {
        match value {
            0 => Use::Road,
            1 => Use::Ramp,
            2 => Use::TurnChannel,
            3 => Use::Track,
            4 => Use::Driveway,
            5 => Use::Alley,
            6 => Use::ParkingAisle,
            7 => Use::Culdesac,
            _ => Use::Other,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Way {
    pub osm_way_id: u64,
    pub speed: f32,
    pub road_class: RoadClass,
    pub way_use: Use,
    pub auto_forward: bool,
    pub auto_backward: bool,
    pub link: bool,
    pub oneway: bool,
    pub node_count: u16,
    /// Indices into the ref string table (0 = absent)
    pub ref_index: u32,
    pub junction_ref_index: u32,
    pub destination_ref_index: u32,
    pub destination_ref_to_index: u32,
    /// Indices into the name string table (0 = absent)
    pub name_index: u32,
    pub destination_street_index: u32,
    pub destination_street_to_index: u32,
    pub destination_index: u32,
}

impl Way {
    pub fn new(
        osm_way_id: u64,
        road_class: RoadClass,
        way_use: Use,
        speed: f32,
        node_count: u16,
    ) -> Self {
        Way {
            osm_way_id,
            speed,
            road_class,
            way_use,
            auto_forward: true,
            auto_backward: true,
            node_count,
            ..Default::default()
        }
    }
}

const FLAG_AUTO_FORWARD: u8 = 1 << 0;
const FLAG_AUTO_BACKWARD: u8 = 1 << 1;
const FLAG_LINK: u8 = 1 << 2;
const FLAG_ONEWAY: u8 = 1 << 3;

impl Record for Way {
    const SIZE: usize = 52;

    fn write_bytes(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.osm_way_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.speed.to_le_bytes());
        buf[12] = self.road_class as u8;
        buf[13] = self.way_use as u8;
        let mut flags = 0u8;
        if self.auto_forward {
            flags |= FLAG_AUTO_FORWARD;
        }
        if self.auto_backward {
            flags |= FLAG_AUTO_BACKWARD;
        }
        if self.link {
            flags |= FLAG_LINK;
        }
        if self.oneway {
            flags |= FLAG_ONEWAY;
        }
        buf[14] = flags;
        buf[15] = 0;
        buf[16..18].copy_from_slice(&self.node_count.to_le_bytes());
        buf[18..20].copy_from_slice(&[0u8; 2]);
        buf[20..24].copy_from_slice(&self.ref_index.to_le_bytes());
        buf[24..28].copy_from_slice(&self.name_index.to_le_bytes());
        buf[28..32].copy_from_slice(&self.junction_ref_index.to_le_bytes());
        buf[32..36].copy_from_slice(&self.destination_ref_index.to_le_bytes());
        buf[36..40].copy_from_slice(&self.destination_ref_to_index.to_le_bytes());
        buf[40..44].copy_from_slice(&self.destination_street_index.to_le_bytes());
        buf[44..48].copy_from_slice(&self.destination_street_to_index.to_le_bytes());
        buf[48..52].copy_from_slice(&self.destination_index.to_le_bytes());
    }

    fn read_bytes(buf: &[u8]) -> Self {
        let flags = buf[14];
        Way {
            osm_way_id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            speed: f32::from_le_bytes(buf[8..12].try_into().unwrap()),
            road_class: RoadClass::from_u8(buf[12]),
            way_use: Use::from_u8(buf[13]),
            auto_forward: flags & FLAG_AUTO_FORWARD != 0,
            auto_backward: flags & FLAG_AUTO_BACKWARD != 0,
            link: flags & FLAG_LINK != 0,
            oneway: flags & FLAG_ONEWAY != 0,
            node_count: u16::from_le_bytes(buf[16..18].try_into().unwrap()),
            ref_index: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            name_index: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            junction_ref_index: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
            destination_ref_index: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
            destination_ref_to_index: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
            destination_street_index: u32::from_le_bytes(buf[40..44].try_into().unwrap()),
            destination_street_to_index: u32::from_le_bytes(buf[44..48].try_into().unwrap()),
            destination_index: u32::from_le_bytes(buf[48..52].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_way_record_round_trip() {
        let mut way = Way::new(1234, RoadClass::Primary, Use::Road, 60.0, 5);
        way.link = true;
        way.oneway = true;
        way.auto_backward = false;
        way.junction_ref_index = 9;
        way.destination_index = 17;

        let mut buf = [0u8; Way::SIZE];
        way.write_bytes(&mut buf);
        let decoded = Way::read_bytes(&buf);
        assert_eq!(decoded.osm_way_id, 1234);
        assert_eq!(decoded.road_class, RoadClass::Primary);
        assert_eq!(decoded.speed, 60.0);
        assert_eq!(decoded.node_count, 5);
        assert!(decoded.link && decoded.oneway && decoded.auto_forward);
        assert!(!decoded.auto_backward);
        assert_eq!(decoded.junction_ref_index, 9);
        assert_eq!(decoded.destination_index, 17);
    }

    #[test]
    fn test_road_class_clamps() {
        assert_eq!(RoadClass::from_u8(200), RoadClass::ServiceOther);
        assert!(RoadClass::Motorway < RoadClass::Tertiary);
    }
}
