//! The fixed zone catalog.
//!
//! Zone ids are stable identifiers shared between character persistence
//! (map id) and the world's runtime channels.

pub const TOWN_ZONE_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneDef {
    pub id: u32,
    pub name: &'static str,
    pub spawn: (f32, f32, f32),
}

pub const ZONES: [ZoneDef; 3] = [
    ZoneDef {
        id: 1,
        name: "Aerheim",
        spawn: (500.0, 0.0, 500.0),
    },
    ZoneDef {
        id: 2,
        name: "Grüne Ebene",
        spawn: (1000.0, 0.0, 1000.0),
    },
    ZoneDef {
        id: 3,
        name: "Dunkler Wald",
        spawn: (2000.0, 0.0, 2000.0),
    },
];

pub fn zone(id: u32) -> Option<&'static ZoneDef> {
    ZONES.iter().find(|z| z.id == id)
}

/// The town every new or misplaced character falls back to.
pub fn town() -> &'static ZoneDef {
    &ZONES[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_shape() {
        assert_eq!(ZONES.len(), 3);
        assert_eq!(zone(1).unwrap().name, "Aerheim");
        assert_eq!(zone(2).unwrap().name, "Grüne Ebene");
        assert_eq!(zone(3).unwrap().name, "Dunkler Wald");
        assert!(zone(4).is_none());
        assert_eq!(town().id, TOWN_ZONE_ID);
    }
}
