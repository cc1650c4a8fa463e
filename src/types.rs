// =============================================================================
// Shared types used across the Reversion Desk service
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Trading signal attached to a single annotated row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Default for Signal {
    fn default() -> Self {
        Self::Hold
    }
}

impl Signal {
    /// `true` for `Buy` and `Sell`.
    pub fn is_action(self) -> bool {
        !matches!(self, Self::Hold)
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

// =============================================================================
// Granularity
// =============================================================================

/// Candle bucket size, using the broker's granularity codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    S5,
    S10,
    S15,
    S30,
    M1,
    M2,
    M4,
    M5,
    M10,
    M15,
    M30,
    H1,
    H2,
    H3,
    H4,
    H6,
    H8,
    H12,
    D,
    W,
    M,
}

impl Default for Granularity {
    fn default() -> Self {
        Self::M5
    }
}

impl Granularity {
    pub const ALL: [Granularity; 21] = [
        Self::S5,
        Self::S10,
        Self::S15,
        Self::S30,
        Self::M1,
        Self::M2,
        Self::M4,
        Self::M5,
        Self::M10,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H3,
        Self::H4,
        Self::H6,
        Self::H8,
        Self::H12,
        Self::D,
        Self::W,
        Self::M,
    ];

    /// Wire code sent to the broker (`"M5"`, `"H1"`, ...).
    pub fn code(self) -> &'static str {
        match self {
            Self::S5 => "S5",
            Self::S10 => "S10",
            Self::S15 => "S15",
            Self::S30 => "S30",
            Self::M1 => "M1",
            Self::M2 => "M2",
            Self::M4 => "M4",
            Self::M5 => "M5",
            Self::M10 => "M10",
            Self::M15 => "M15",
            Self::M30 => "M30",
            Self::H1 => "H1",
            Self::H2 => "H2",
            Self::H3 => "H3",
            Self::H4 => "H4",
            Self::H6 => "H6",
            Self::H8 => "H8",
            Self::H12 => "H12",
            Self::D => "D",
            Self::W => "W",
            Self::M => "M",
        }
    }

    /// Human-readable label for dropdowns.
    pub fn label(self) -> &'static str {
        match self {
            Self::S5 => "5 seconds",
            Self::S10 => "10 seconds",
            Self::S15 => "15 seconds",
            Self::S30 => "30 seconds",
            Self::M1 => "1 minute",
            Self::M2 => "2 minutes",
            Self::M4 => "4 minutes",
            Self::M5 => "5 minutes",
            Self::M10 => "10 minutes",
            Self::M15 => "15 minutes",
            Self::M30 => "30 minutes",
            Self::H1 => "1 hour",
            Self::H2 => "2 hours",
            Self::H3 => "3 hours",
            Self::H4 => "4 hours",
            Self::H6 => "6 hours",
            Self::H8 => "8 hours",
            Self::H12 => "12 hours",
            Self::D => "1 day",
            Self::W => "1 week",
            Self::M => "1 month",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Granularity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|g| g.code() == s)
            .ok_or_else(|| PipelineError::UnknownGranularity(s.to_string()))
    }
}

// =============================================================================
// Instruments
// =============================================================================

/// Asset class of a selectable instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Currency,
    Index,
    Commodity,
}

/// Entry in the fixed instrument catalogue.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Instrument {
    pub symbol: &'static str,
    pub display_name: &'static str,
    pub class: AssetClass,
}

/// Instruments the dashboard offers.
pub const INSTRUMENTS: &[Instrument] = &[
    Instrument { symbol: "EUR_USD", display_name: "EUR/USD", class: AssetClass::Currency },
    Instrument { symbol: "GBP_USD", display_name: "GBP/USD", class: AssetClass::Currency },
    Instrument { symbol: "USD_JPY", display_name: "USD/JPY", class: AssetClass::Currency },
    Instrument { symbol: "AUD_USD", display_name: "AUD/USD", class: AssetClass::Currency },
    Instrument { symbol: "USD_CAD", display_name: "USD/CAD", class: AssetClass::Currency },
    Instrument { symbol: "USD_CHF", display_name: "USD/CHF", class: AssetClass::Currency },
    Instrument { symbol: "NZD_USD", display_name: "NZD/USD", class: AssetClass::Currency },
    Instrument { symbol: "EUR_GBP", display_name: "EUR/GBP", class: AssetClass::Currency },
    Instrument { symbol: "SPX500_USD", display_name: "S&P 500", class: AssetClass::Index },
    Instrument { symbol: "NAS100_USD", display_name: "Nasdaq 100", class: AssetClass::Index },
    Instrument { symbol: "US30_USD", display_name: "Dow 30", class: AssetClass::Index },
    Instrument { symbol: "DE30_EUR", display_name: "DAX 30", class: AssetClass::Index },
    Instrument { symbol: "XAU_USD", display_name: "Gold", class: AssetClass::Commodity },
    Instrument { symbol: "XAG_USD", display_name: "Silver", class: AssetClass::Commodity },
    Instrument { symbol: "WTICO_USD", display_name: "WTI Crude", class: AssetClass::Commodity },
    Instrument { symbol: "BCO_USD", display_name: "Brent Crude", class: AssetClass::Commodity },
];

/// Look up a catalogue entry by broker symbol.
pub fn find_instrument(symbol: &str) -> Result<&'static Instrument, PipelineError> {
    INSTRUMENTS
        .iter()
        .find(|i| i.symbol == symbol)
        .ok_or_else(|| PipelineError::UnknownInstrument(symbol.to_string()))
}

// =============================================================================
// Display parameters
// =============================================================================

/// Column groups the chart consumer can toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Bollinger,
    SupportResistance,
    Signals,
}

impl Indicator {
    pub const ALL: [Indicator; 3] = [Self::Bollinger, Self::SupportResistance, Self::Signals];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Default for Theme {
    fn default() -> Self {
        Self::Dark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granularity_codes_parse_back() {
        for g in Granularity::ALL {
            assert_eq!(g.code().parse::<Granularity>().unwrap(), g);
        }
        assert!("M3".parse::<Granularity>().is_err());
    }

    #[test]
    fn signal_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&Signal::Buy).unwrap(), "\"buy\"");
        assert_eq!(Signal::default(), Signal::Hold);
        assert!(!Signal::Hold.is_action());
    }

    #[test]
    fn unknown_instrument_rejected() {
        assert!(find_instrument("EUR_USD").is_ok());
        assert!(matches!(
            find_instrument("DOGE_USD"),
            Err(PipelineError::UnknownInstrument(_))
        ));
    }
}
