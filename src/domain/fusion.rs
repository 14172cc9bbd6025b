//! Decision fusion: blends the technical composite with an advisory opinion.
//!
//! The blend is a weighted sum of two directional scores in [-1, 1]. Weights
//! are normalized so they always sum to one. Without an advisory opinion the
//! technical score is used alone and the decision is flagged as degraded.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use tracing::warn;

use super::error::{AdvisoryParseError, EngineError};
use super::indicator::SignalBundle;
use super::risk::RiskLimits;
use crate::ports::advisory_port::AdvisoryPort;

const SECTION: &str = "fusion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn sign(&self) -> f64 {
        match self {
            Action::Buy => 1.0,
            Action::Sell => -1.0,
            Action::Hold => 0.0,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

impl FromStr for Action {
    type Err = AdvisoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Action::Buy),
            "sell" => Ok(Action::Sell),
            "hold" => Ok(Action::Hold),
            other => Err(AdvisoryParseError::new(format!("unknown action '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sentiment {
    Bullish,
    Neutral,
    Bearish,
}

impl Sentiment {
    pub fn sign(&self) -> f64 {
        match self {
            Sentiment::Bullish => 1.0,
            Sentiment::Neutral => 0.0,
            Sentiment::Bearish => -1.0,
        }
    }
}

impl FromStr for Sentiment {
    type Err = AdvisoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" | "positive" => Ok(Sentiment::Bullish),
            "neutral" => Ok(Sentiment::Neutral),
            "bearish" | "negative" => Ok(Sentiment::Bearish),
            other => Err(AdvisoryParseError::new(format!(
                "unknown sentiment '{other}'"
            ))),
        }
    }
}

/// A typed opinion from the advisory bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisoryOpinion {
    pub sentiment: Sentiment,
    /// 0-100.
    pub confidence: f64,
    pub action: Action,
    pub reasoning: String,
}

impl AdvisoryOpinion {
    /// Mean of the sentiment and action directions, scaled by confidence.
    pub fn directional_score(&self) -> f64 {
        (self.sentiment.sign() + self.action.sign()) / 2.0 * self.confidence / 100.0
    }
}

/// Parse a `KEY: value` advisory response.
///
/// `SENTIMENT`, `CONFIDENCE` and `ACTION` are required. `REASONING` is
/// optional and absorbs any unkeyed lines that follow it. Keys are
/// case-insensitive; a trailing `%` on the confidence is accepted.
pub fn parse_advisory(text: &str) -> Result<AdvisoryOpinion, AdvisoryParseError> {
    let mut sentiment = None;
    let mut confidence = None;
    let mut action = None;
    let mut reasoning: Option<String> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let keyed = trimmed
            .split_once(':')
            .map(|(k, v)| (k.trim().to_ascii_uppercase(), v.trim()));
        match keyed.as_ref().map(|(k, v)| (k.as_str(), *v)) {
            Some(("SENTIMENT", v)) => sentiment = Some(v.parse::<Sentiment>()?),
            Some(("ACTION", v)) => action = Some(v.parse::<Action>()?),
            Some(("CONFIDENCE", v)) => {
                let raw = v.trim_end_matches('%').trim();
                let value: f64 = raw.parse().map_err(|_| {
                    AdvisoryParseError::new(format!("confidence '{v}' is not a number"))
                })?;
                if !(0.0..=100.0).contains(&value) {
                    return Err(AdvisoryParseError::new(format!(
                        "confidence {value} outside [0, 100]"
                    )));
                }
                confidence = Some(value);
            }
            Some(("REASONING", v)) => reasoning = Some(v.to_string()),
            _ => {
                if let Some(r) = reasoning.as_mut() {
                    if !r.is_empty() {
                        r.push(' ');
                    }
                    r.push_str(trimmed);
                }
            }
        }
    }

    Ok(AdvisoryOpinion {
        sentiment: sentiment.ok_or_else(|| AdvisoryParseError::new("missing SENTIMENT"))?,
        confidence: confidence.ok_or_else(|| AdvisoryParseError::new("missing CONFIDENCE"))?,
        action: action.ok_or_else(|| AdvisoryParseError::new("missing ACTION"))?,
        reasoning: reasoning.unwrap_or_default(),
    })
}

/// Weights and threshold for blending technical and advisory scores.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionPolicy {
    pub technical_weight: f64,
    pub advisory_weight: f64,
    /// Blended score magnitude needed to act.
    pub threshold: f64,
}

impl Default for FusionPolicy {
    fn default() -> Self {
        TradingProfile::Moderate.fusion_policy()
    }
}

impl FusionPolicy {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (key, value) in [
            ("technical_weight", self.technical_weight),
            ("advisory_weight", self.advisory_weight),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(EngineError::invalid(
                    SECTION,
                    key,
                    format!("must be non-negative, got {value}"),
                ));
            }
        }
        if self.technical_weight <= 0.0 {
            return Err(EngineError::invalid(
                SECTION,
                "technical_weight",
                "must be positive so degraded decisions remain possible",
            ));
        }
        if !(self.threshold >= 0.0 && self.threshold < 1.0) {
            return Err(EngineError::invalid(
                SECTION,
                "threshold",
                format!("must be in [0, 1), got {}", self.threshold),
            ));
        }
        Ok(())
    }

    /// (technical, advisory), summing to one.
    pub fn normalized_weights(&self) -> (f64, f64) {
        let total = self.technical_weight + self.advisory_weight;
        if total > 0.0 {
            (self.technical_weight / total, self.advisory_weight / total)
        } else {
            (1.0, 0.0)
        }
    }
}

/// Named presets for fusion weighting and risk limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingProfile {
    Conservative,
    Moderate,
    Aggressive,
}

impl TradingProfile {
    pub fn fusion_policy(&self) -> FusionPolicy {
        let (technical_weight, advisory_weight, threshold) = match self {
            TradingProfile::Conservative => (0.8, 0.2, 0.5),
            TradingProfile::Moderate => (0.7, 0.3, 0.3),
            TradingProfile::Aggressive => (0.6, 0.4, 0.2),
        };
        FusionPolicy {
            technical_weight,
            advisory_weight,
            threshold,
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        match self {
            TradingProfile::Conservative => RiskLimits {
                max_position_size_percent: 10.0,
                max_daily_loss_percent: 1.0,
                max_portfolio_exposure_percent: 50.0,
                max_trades_per_day: 5,
                min_confidence_percent: 60.0,
                size_down: false,
            },
            TradingProfile::Moderate => RiskLimits::default(),
            TradingProfile::Aggressive => RiskLimits {
                max_position_size_percent: 30.0,
                max_daily_loss_percent: 5.0,
                max_portfolio_exposure_percent: 100.0,
                max_trades_per_day: 20,
                min_confidence_percent: 20.0,
                size_down: true,
            },
        }
    }
}

impl fmt::Display for TradingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingProfile::Conservative => write!(f, "conservative"),
            TradingProfile::Moderate => write!(f, "moderate"),
            TradingProfile::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl FromStr for TradingProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(TradingProfile::Conservative),
            "moderate" => Ok(TradingProfile::Moderate),
            "aggressive" => Ok(TradingProfile::Aggressive),
            other => Err(format!(
                "unknown profile '{other}' (expected conservative, moderate or aggressive)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionDecision {
    pub action: Action,
    /// 0-100.
    pub confidence: f64,
    pub blended_score: f64,
    pub technical_score: f64,
    pub advisory_score: Option<f64>,
    pub reasoning: String,
    /// True when the advisory opinion was unavailable.
    pub degraded: bool,
}

impl FusionDecision {
    pub fn hold(reasoning: impl Into<String>) -> Self {
        FusionDecision {
            action: Action::Hold,
            confidence: 0.0,
            blended_score: 0.0,
            technical_score: 0.0,
            advisory_score: None,
            reasoning: reasoning.into(),
            degraded: false,
        }
    }

    /// A decision produced outside the fusion blend, e.g. by a scripted strategy.
    pub fn manual(action: Action, confidence: f64, reasoning: impl Into<String>) -> Self {
        let blended = action.sign() * confidence / 100.0;
        FusionDecision {
            action,
            confidence,
            blended_score: blended,
            technical_score: blended,
            advisory_score: None,
            reasoning: reasoning.into(),
            degraded: false,
        }
    }
}

pub fn decide(
    signals: &SignalBundle,
    advisory: Option<&AdvisoryOpinion>,
    policy: &FusionPolicy,
) -> FusionDecision {
    let technical = signals.composite_score.clamp(-1.0, 1.0);
    let advisory_score = advisory.map(AdvisoryOpinion::directional_score);

    let blended = match advisory_score {
        Some(score) => {
            let (wt, wa) = policy.normalized_weights();
            wt * technical + wa * score
        }
        None => technical,
    };

    let action = if blended > policy.threshold {
        Action::Buy
    } else if blended < -policy.threshold {
        Action::Sell
    } else {
        Action::Hold
    };

    let mut reasoning = format!(
        "technical {technical:+.3} (trend {:+.3}, momentum {:+.3}, volume {:+.3})",
        signals.trend_score, signals.momentum_score, signals.volume_score
    );
    match (advisory, advisory_score) {
        (Some(opinion), Some(score)) => {
            reasoning.push_str(&format!(
                "; advisory {score:+.3} ({} {:?} at {:.0}%)",
                opinion.action, opinion.sentiment, opinion.confidence
            ));
            if !opinion.reasoning.is_empty() {
                reasoning.push_str(&format!(": {}", opinion.reasoning));
            }
        }
        _ => reasoning.push_str("; advisory unavailable, technical only"),
    }
    reasoning.push_str(&format!(
        "; blended {blended:+.3} vs threshold {:.3} -> {action}",
        policy.threshold
    ));

    FusionDecision {
        action,
        confidence: (blended.abs() * 100.0).min(100.0),
        blended_score: blended,
        technical_score: technical,
        advisory_score,
        reasoning,
        degraded: advisory.is_none(),
    }
}

/// Anything that turns a signal bundle into a decision.
pub trait DecisionSource {
    fn decide(&mut self, signals: &SignalBundle) -> FusionDecision;
}

impl<F> DecisionSource for F
where
    F: FnMut(&SignalBundle) -> FusionDecision,
{
    fn decide(&mut self, signals: &SignalBundle) -> FusionDecision {
        self(signals)
    }
}

/// Technical-only fusion.
#[derive(Debug, Clone)]
pub struct TechnicalDecisions {
    policy: FusionPolicy,
}

impl TechnicalDecisions {
    pub fn new(policy: FusionPolicy) -> Self {
        TechnicalDecisions { policy }
    }
}

impl DecisionSource for TechnicalDecisions {
    fn decide(&mut self, signals: &SignalBundle) -> FusionDecision {
        decide(signals, None, &self.policy)
    }
}

/// Fusion that asks an advisory port first and degrades when it fails.
pub struct AdvisedDecisions<A: AdvisoryPort> {
    advisory: A,
    policy: FusionPolicy,
    degraded: usize,
}

impl<A: AdvisoryPort> AdvisedDecisions<A> {
    pub fn new(advisory: A, policy: FusionPolicy) -> Self {
        AdvisedDecisions {
            advisory,
            policy,
            degraded: 0,
        }
    }

    /// Decisions made without an advisory opinion so far.
    pub fn degraded_count(&self) -> usize {
        self.degraded
    }
}

impl<A: AdvisoryPort> DecisionSource for AdvisedDecisions<A> {
    fn decide(&mut self, signals: &SignalBundle) -> FusionDecision {
        let prompt = signals.to_string();
        match self.advisory.opinion(&signals.symbol, &prompt) {
            Ok(opinion) => decide(signals, Some(&opinion), &self.policy),
            Err(e) => {
                warn!(
                    symbol = %signals.symbol,
                    timestamp = %signals.timestamp,
                    error = %e,
                    "advisory unavailable, using technical-only fusion"
                );
                self.degraded += 1;
                decide(signals, None, &self.policy)
            }
        }
    }
}
