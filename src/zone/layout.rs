use std::fmt;
use std::str::FromStr;

use anyhow::Result;

use super::polygon::Polygon;

// Zone coordinate tables, in the native resolution of each site's camera.

const GROCERY_CHECKOUT: &[(i32, i32)] = &[(1725, 1550), (2725, 1550), (3500, 2160), (1250, 2160)];

const SUBWAY_PLATFORM_EDGE: &[(i32, i32)] = &[(200, 3840), (1300, 600), (1325, 600), (550, 3840)];

const MARKET_CENTER: &[(i32, i32)] = &[
    (540, 985),
    (1620, 985),
    (2160, 1920),
    (1620, 2855),
    (540, 2855),
    (0, 1920),
];
const MARKET_UPPER_LEFT: &[(i32, i32)] = &[(0, 1920), (540, 985), (0, 0)];
const MARKET_UPPER_RIGHT: &[(i32, i32)] = &[(1620, 985), (2160, 1920), (2160, 0)];
const MARKET_TOP: &[(i32, i32)] = &[(540, 985), (0, 0), (2160, 0), (1620, 985)];
const MARKET_LOWER_LEFT: &[(i32, i32)] = &[(0, 1920), (0, 3840), (540, 2855)];
const MARKET_LOWER_RIGHT: &[(i32, i32)] = &[(2160, 1920), (1620, 2855), (2160, 3840)];
const MARKET_BOTTOM: &[(i32, i32)] = &[(1620, 2855), (540, 2855), (0, 3840), (2160, 3840)];

struct ZoneTable {
    name: &'static str,
    points: &'static [(i32, i32)],
}

const GROCERY_STORE_ZONES: &[ZoneTable] = &[ZoneTable {
    name: "checkout",
    points: GROCERY_CHECKOUT,
}];

const SUBWAY_ZONES: &[ZoneTable] = &[ZoneTable {
    name: "platform_edge",
    points: SUBWAY_PLATFORM_EDGE,
}];

const MARKET_SQUARE_ZONES: &[ZoneTable] = &[
    ZoneTable {
        name: "center",
        points: MARKET_CENTER,
    },
    ZoneTable {
        name: "upper_left",
        points: MARKET_UPPER_LEFT,
    },
    ZoneTable {
        name: "upper_right",
        points: MARKET_UPPER_RIGHT,
    },
    ZoneTable {
        name: "top",
        points: MARKET_TOP,
    },
    ZoneTable {
        name: "lower_left",
        points: MARKET_LOWER_LEFT,
    },
    ZoneTable {
        name: "lower_right",
        points: MARKET_LOWER_RIGHT,
    },
    ZoneTable {
        name: "bottom",
        points: MARKET_BOTTOM,
    },
];

/// Site layouts the service knows how to count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SiteType {
    GroceryStore,
    Subway,
    MarketSquare,
}

impl SiteType {
    pub const ALL: [SiteType; 3] = [
        SiteType::GroceryStore,
        SiteType::Subway,
        SiteType::MarketSquare,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SiteType::GroceryStore => "grocery_store",
            SiteType::Subway => "subway",
            SiteType::MarketSquare => "market_square",
        }
    }

    /// Minimum person confidence counted for this site. Detections must score
    /// strictly above it.
    pub fn confidence_threshold(self) -> f32 {
        match self {
            SiteType::GroceryStore | SiteType::Subway => 0.0,
            SiteType::MarketSquare => 0.5,
        }
    }

    fn zone_table(self) -> &'static [ZoneTable] {
        match self {
            SiteType::GroceryStore => GROCERY_STORE_ZONES,
            SiteType::Subway => SUBWAY_ZONES,
            SiteType::MarketSquare => MARKET_SQUARE_ZONES,
        }
    }
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized site type '{0}'")]
pub struct UnknownSiteType(pub String);

impl FromStr for SiteType {
    type Err = UnknownSiteType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SiteType::ALL
            .into_iter()
            .find(|site| site.as_str() == s)
            .ok_or_else(|| UnknownSiteType(s.to_string()))
    }
}

/// A named region of a layout.
#[derive(Clone, Debug)]
pub struct ZoneSpec {
    pub name: &'static str,
    pub polygon: Polygon,
    /// Palette slot for annotation. `None` draws the zone in the neutral colour.
    pub color_index: Option<usize>,
}

/// Ordered, immutable set of zones for one site type.
#[derive(Clone, Debug)]
pub struct ZoneLayout {
    site: SiteType,
    zones: Vec<ZoneSpec>,
}

impl ZoneLayout {
    pub fn for_site(site: SiteType) -> Result<Self> {
        let table = site.zone_table();
        let multi_zone = table.len() > 1;
        let zones = table
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                Ok(ZoneSpec {
                    name: entry.name,
                    polygon: Polygon::from_table(entry.points)?,
                    color_index: multi_zone.then_some(index),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { site, zones })
    }

    pub fn site(&self) -> SiteType {
        self.site
    }

    pub fn zones(&self) -> &[ZoneSpec] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn is_multi_zone(&self) -> bool {
        self.zones.len() > 1
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.site.confidence_threshold()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_site_types() {
        assert_eq!("grocery_store".parse::<SiteType>().unwrap(), SiteType::GroceryStore);
        assert_eq!("subway".parse::<SiteType>().unwrap(), SiteType::Subway);
        assert_eq!("market_square".parse::<SiteType>().unwrap(), SiteType::MarketSquare);
    }

    #[test]
    fn rejects_unknown_site_types() {
        let err = "parking_lot".parse::<SiteType>().unwrap_err();
        assert_eq!(err.0, "parking_lot");
        assert!("Grocery_Store".parse::<SiteType>().is_err());
        assert!("".parse::<SiteType>().is_err());
    }

    #[test]
    fn layouts_have_expected_zone_counts() {
        let grocery = ZoneLayout::for_site(SiteType::GroceryStore).unwrap();
        let subway = ZoneLayout::for_site(SiteType::Subway).unwrap();
        let market = ZoneLayout::for_site(SiteType::MarketSquare).unwrap();
        assert_eq!(grocery.len(), 1);
        assert_eq!(subway.len(), 1);
        assert_eq!(market.len(), 7);
        assert!(!grocery.is_multi_zone());
        assert!(market.is_multi_zone());
    }

    #[test]
    fn only_market_square_filters_on_confidence() {
        assert_eq!(SiteType::GroceryStore.confidence_threshold(), 0.0);
        assert_eq!(SiteType::Subway.confidence_threshold(), 0.0);
        assert_eq!(SiteType::MarketSquare.confidence_threshold(), 0.5);
    }

    #[test]
    fn market_square_zones_carry_palette_indices() {
        let market = ZoneLayout::for_site(SiteType::MarketSquare).unwrap();
        let indices: Vec<_> = market.zones().iter().map(|z| z.color_index).collect();
        assert_eq!(indices, (0..7).map(Some).collect::<Vec<_>>());

        let grocery = ZoneLayout::for_site(SiteType::GroceryStore).unwrap();
        assert_eq!(grocery.zones()[0].color_index, None);
    }

    #[test]
    fn market_square_tiles_the_frame() {
        let market = ZoneLayout::for_site(SiteType::MarketSquare).unwrap();
        for &(x, y) in &[(1080.0, 1920.0), (100.0, 100.0), (2100.0, 3800.0), (1080.0, 50.0)] {
            let hits = market
                .zones()
                .iter()
                .filter(|zone| zone.polygon.contains(x, y))
                .count();
            assert!(hits >= 1, "({x}, {y}) fell outside every zone");
        }
    }
}
