//! The closed taxonomy of payment failure modes.

use serde::{Deserialize, Serialize};

/// A way a direct-integration agent can get a payment wrong.
///
/// Declaration order is the predicate priority order: when a trial's draws
/// satisfy several predicates, the earliest mode wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Agent states a price that is not the catalog price
    PriceHallucination,
    
    /// Injected instructions rewrite the amount
    PromptInjection,
    
    /// Cart contents fall out of the context window
    ContextOverflow,
    
    /// Float rounding / arithmetic mistakes in the total
    CalculationError,
    
    /// Casual phrasing read as payment authorization
    AuthorizationAmbiguity,
    
    /// Concurrent or retried requests produce a second charge
    RaceCondition,
    
    /// Recurring mandate created with the wrong frequency
    FrequencyError,
    
    /// Amount interpreted in the wrong currency
    CurrencyConfusion,
}

impl FailureMode {
    /// Returns every mode in priority order.
    pub fn all() -> [FailureMode; 8] {
        [
            FailureMode::PriceHallucination,
            FailureMode::PromptInjection,
            FailureMode::ContextOverflow,
            FailureMode::CalculationError,
            FailureMode::AuthorizationAmbiguity,
            FailureMode::RaceCondition,
            FailureMode::FrequencyError,
            FailureMode::CurrencyConfusion,
        ]
    }
    
    /// Position in the predicate evaluation order (0 = checked first).
    pub fn priority(&self) -> usize {
        *self as usize
    }
    
    /// Returns the configuration / report name.
    pub fn name(&self) -> &'static str {
        match self {
            FailureMode::PriceHallucination => "price_hallucination",
            FailureMode::PromptInjection => "prompt_injection",
            FailureMode::ContextOverflow => "context_overflow",
            FailureMode::CalculationError => "calculation_error",
            FailureMode::AuthorizationAmbiguity => "authorization_ambiguity",
            FailureMode::RaceCondition => "race_condition",
            FailureMode::FrequencyError => "frequency_error",
            FailureMode::CurrencyConfusion => "currency_confusion",
        }
    }
    
    /// Returns a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            FailureMode::PriceHallucination => "Agent hallucinates the amount it charges",
            FailureMode::PromptInjection => "Attacker-supplied text overrides the payment amount",
            FailureMode::ContextOverflow => "Long conversation pushes the cart out of context",
            FailureMode::CalculationError => "Rounding and arithmetic errors in the total",
            FailureMode::AuthorizationAmbiguity => "Ambiguous phrase treated as payment authorization",
            FailureMode::RaceCondition => "Duplicate request creates a second charge",
            FailureMode::FrequencyError => "Recurring mandate set up with the wrong frequency",
            FailureMode::CurrencyConfusion => "Amount interpreted in the wrong currency",
        }
    }
}

impl std::fmt::Display for FailureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for FailureMode {
    type Err = String;
    
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "price_hallucination" | "hallucination" => Ok(FailureMode::PriceHallucination),
            "prompt_injection" | "injection" => Ok(FailureMode::PromptInjection),
            "context_overflow" | "context_loss" => Ok(FailureMode::ContextOverflow),
            "calculation_error" | "calculation_errors" | "floating_point" => Ok(FailureMode::CalculationError),
            "authorization_ambiguity" | "authorization" => Ok(FailureMode::AuthorizationAmbiguity),
            "race_condition" | "duplicate_charge" => Ok(FailureMode::RaceCondition),
            "frequency_error" | "upi_frequency_error" => Ok(FailureMode::FrequencyError),
            "currency_confusion" | "currency" => Ok(FailureMode::CurrencyConfusion),
            _ => Err(format!("Unknown failure mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_priority_matches_declaration_order() {
        let all = FailureMode::all();
        for (i, mode) in all.iter().enumerate() {
            assert_eq!(mode.priority(), i);
        }
        assert!(FailureMode::PriceHallucination < FailureMode::PromptInjection);
        assert!(FailureMode::PromptInjection < FailureMode::ContextOverflow);
        assert!(FailureMode::ContextOverflow < FailureMode::CalculationError);
    }
    
    #[test]
    fn test_name_roundtrip() {
        for mode in FailureMode::all() {
            assert_eq!(mode.name().parse::<FailureMode>().unwrap(), mode);
        }
        assert_eq!("upi-frequency-error".parse::<FailureMode>().unwrap(), FailureMode::FrequencyError);
        assert!("teleportation".parse::<FailureMode>().is_err());
    }
    
    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&FailureMode::CurrencyConfusion).unwrap();
        assert_eq!(json, "\"currency_confusion\"");
    }
}
