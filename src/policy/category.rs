use std::{fmt, str::FromStr};

use crate::error::NetwardenError;

/// Network path that can be blocked for a single application
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RestrictionCategory {
    Wifi,
    MobileData,
    Vpn,
    Background,
}

impl RestrictionCategory {
    /// Every category, in the order block-all and allow-all apply them
    pub const ALL: [RestrictionCategory; 4] = [
        RestrictionCategory::Wifi,
        RestrictionCategory::MobileData,
        RestrictionCategory::Vpn,
        RestrictionCategory::Background,
    ];

    /// Stable identifier used on the command line and in logs
    pub fn as_str(self) -> &'static str {
        match self {
            RestrictionCategory::Wifi => "wifi",
            RestrictionCategory::MobileData => "mobile-data",
            RestrictionCategory::Vpn => "vpn",
            RestrictionCategory::Background => "background",
        }
    }

    /// Human readable label for detail views
    pub fn label(self) -> &'static str {
        match self {
            RestrictionCategory::Wifi => "WiFi",
            RestrictionCategory::MobileData => "Mobile Data",
            RestrictionCategory::Vpn => "VPN",
            RestrictionCategory::Background => "Background Data",
        }
    }
}

impl fmt::Display for RestrictionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestrictionCategory {
    type Err = NetwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wifi" => Ok(RestrictionCategory::Wifi),
            "mobile-data" | "mobile_data" | "data" | "mobile" => Ok(RestrictionCategory::MobileData),
            "vpn" => Ok(RestrictionCategory::Vpn),
            "background" | "bg" => Ok(RestrictionCategory::Background),
            _ => Err(NetwardenError::UnknownCategory {
                name: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("wifi", RestrictionCategory::Wifi)]
    #[case("WiFi", RestrictionCategory::Wifi)]
    #[case("mobile-data", RestrictionCategory::MobileData)]
    #[case("data", RestrictionCategory::MobileData)]
    #[case(" vpn ", RestrictionCategory::Vpn)]
    #[case("background", RestrictionCategory::Background)]
    fn parses_known_names(#[case] input: &str, #[case] expected: RestrictionCategory) {
        assert_eq!(input.parse::<RestrictionCategory>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_name() {
        let err = "bluetooth".parse::<RestrictionCategory>().unwrap_err();
        assert!(matches!(err, NetwardenError::UnknownCategory { name } if name == "bluetooth"));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for category in RestrictionCategory::ALL {
            assert_eq!(
                category.to_string().parse::<RestrictionCategory>().unwrap(),
                category
            );
        }
    }
}
