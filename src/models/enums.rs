use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when an enum is parsed from an unknown string form.
#[derive(Debug, Error)]
#[error("Invalid {field} value: {value}")]
pub struct InvalidEnum {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnum;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(ResultFlag {
    Normal => "normal",
    AbnormalLow => "abnormal_low",
    AbnormalHigh => "abnormal_high",
    Critical => "critical",
    Unknown => "unknown",
});

impl ResultFlag {
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }

    /// Anything other than a plain in-range result.
    pub fn is_abnormal(&self) -> bool {
        matches!(self, Self::AbnormalLow | Self::AbnormalHigh | Self::Critical)
    }
}

str_enum!(Sex {
    Female => "female",
    Male => "male",
});

str_enum!(Trend {
    Rising => "rising",
    Falling => "falling",
    Stable => "stable",
});
