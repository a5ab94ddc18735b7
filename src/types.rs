// src/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of execution core an accelerator context stands for
///
/// The dispatch engine treats both kinds the same way; the kind only
/// matters for naming, logging and how many of each are created.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorKind {
    /// Hardware thread on the control core (PPU-equivalent)
    Ppu,

    /// Dedicated accelerator core (SPU-equivalent)
    Spu,
}

impl fmt::Display for AcceleratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceleratorKind::Ppu => write!(f, "ppu"),
            AcceleratorKind::Spu => write!(f, "spu"),
        }
    }
}

impl FromStr for AcceleratorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ppu" | "ppe" => Ok(AcceleratorKind::Ppu),
            "spu" | "spe" => Ok(AcceleratorKind::Spu),
            _ => Err(format!("Unknown accelerator kind: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_unit_aliases() {
        assert_eq!("PPE".parse::<AcceleratorKind>(), Ok(AcceleratorKind::Ppu));
        assert_eq!("spe".parse::<AcceleratorKind>(), Ok(AcceleratorKind::Spu));
        assert!("gpu".parse::<AcceleratorKind>().is_err());
    }

    #[test]
    fn kind_display_matches_parse() {
        for kind in [AcceleratorKind::Ppu, AcceleratorKind::Spu] {
            assert_eq!(kind.to_string().parse::<AcceleratorKind>(), Ok(kind));
        }
    }
}
