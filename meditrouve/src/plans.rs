//! Subscription plan capability table.
//!
//! Every plan-dependent decision goes through [`capability`], so the points
//! and reward engines never branch on billing tiers themselves.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::gamification::UnknownVariant;

/// Limit value meaning "no limit"
pub const UNLIMITED: i64 = -1;

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanId {
    Free,
    Premium,
    Famille,
}

impl PlanId {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanId::Free => "FREE",
            PlanId::Premium => "PREMIUM",
            PlanId::Famille => "FAMILLE",
        }
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanId {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FREE" => Ok(PlanId::Free),
            "PREMIUM" => Ok(PlanId::Premium),
            "FAMILLE" => Ok(PlanId::Famille),
            other => Err(UnknownVariant::new("plan", other)),
        }
    }
}

/// Plan-gated feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    MaxProfiles,
    MaxReminders,
    MaxFamilyInvites,
    HasOcr,
    HasPredictions,
    HasDataExport,
    HasFullHistory,
    HasFamilySharing,
    HasAdvancedReminders,
}

impl Feature {
    pub const ALL: [Feature; 9] = [
        Feature::MaxProfiles,
        Feature::MaxReminders,
        Feature::MaxFamilyInvites,
        Feature::HasOcr,
        Feature::HasPredictions,
        Feature::HasDataExport,
        Feature::HasFullHistory,
        Feature::HasFamilySharing,
        Feature::HasAdvancedReminders,
    ];

    /// Cheapest plan that unlocks this feature
    pub fn suggested_upgrade(self) -> PlanId {
        match self {
            Feature::MaxProfiles | Feature::MaxFamilyInvites | Feature::HasFamilySharing => {
                PlanId::Famille
            }
            _ => PlanId::Premium,
        }
    }

    fn denied_message(self) -> &'static str {
        match self {
            Feature::MaxProfiles => "Vous avez atteint la limite de profils pour votre plan.",
            Feature::MaxReminders => "Vous avez atteint la limite de rappels pour votre plan.",
            Feature::MaxFamilyInvites | Feature::HasFamilySharing => {
                "Le partage famille n'est pas disponible avec votre plan."
            }
            Feature::HasOcr => {
                "La reconnaissance d'ordonnance n'est pas disponible avec votre plan."
            }
            Feature::HasPredictions => {
                "Les predictions de rupture ne sont pas disponibles avec votre plan."
            }
            Feature::HasDataExport => "L'export de donnees n'est pas disponible avec votre plan.",
            Feature::HasFullHistory => {
                "L'historique complet n'est pas disponible avec votre plan."
            }
            Feature::HasAdvancedReminders => {
                "La gestion de stock n'est pas disponible avec votre plan."
            }
        }
    }
}

/// One cell of the capability table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Capability {
    Flag(bool),
    /// Maximum count, or [`UNLIMITED`]
    Limit(i64),
}

impl Capability {
    pub fn is_enabled(self) -> bool {
        match self {
            Capability::Flag(enabled) => enabled,
            Capability::Limit(limit) => limit != 0,
        }
    }
}

/// Look up what `plan` allows for `feature`
pub fn capability(plan: PlanId, feature: Feature) -> Capability {
    use Capability::{Flag, Limit};

    match (feature, plan) {
        (Feature::MaxProfiles, PlanId::Famille) => Limit(5),
        (Feature::MaxProfiles, _) => Limit(1),

        (Feature::MaxReminders, PlanId::Free) => Limit(3),
        (Feature::MaxReminders, _) => Limit(UNLIMITED),

        (Feature::MaxFamilyInvites, PlanId::Famille) => Limit(4),
        (Feature::MaxFamilyInvites, _) => Limit(0),

        (Feature::HasFamilySharing, plan) => Flag(plan == PlanId::Famille),

        (
            Feature::HasOcr
            | Feature::HasPredictions
            | Feature::HasDataExport
            | Feature::HasFullHistory
            | Feature::HasAdvancedReminders,
            plan,
        ) => Flag(plan != PlanId::Free),
    }
}

/// Outcome of a plan check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCheck {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_required: Option<PlanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_usage: Option<i64>,
}

impl FeatureCheck {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            upgrade_required: None,
            current_limit: None,
            current_usage: None,
        }
    }

    fn denied(feature: Feature) -> Self {
        Self {
            allowed: false,
            reason: Some(feature.denied_message()),
            upgrade_required: Some(feature.suggested_upgrade()),
            current_limit: None,
            current_usage: None,
        }
    }
}

/// Whether `plan` has `feature` at all
pub fn check_feature(plan: PlanId, feature: Feature) -> FeatureCheck {
    if capability(plan, feature).is_enabled() {
        FeatureCheck::allowed()
    } else {
        FeatureCheck::denied(feature)
    }
}

/// Whether one more use fits under `plan`'s limit for `feature`
///
/// Flag features are never limited here; use [`check_feature`] for them.
pub fn check_limit(plan: PlanId, feature: Feature, current_usage: i64) -> FeatureCheck {
    let Capability::Limit(limit) = capability(plan, feature) else {
        return FeatureCheck::allowed();
    };
    if limit == UNLIMITED {
        return FeatureCheck::allowed();
    }

    let check = if current_usage < limit {
        FeatureCheck::allowed()
    } else {
        FeatureCheck::denied(feature)
    };
    FeatureCheck {
        current_limit: Some(limit),
        current_usage: Some(current_usage),
        ..check
    }
}

/// Display summary of one feature for a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStatus {
    pub feature: Feature,
    pub enabled: bool,
    /// `None` for flags and unlimited features
    pub limit: Option<i64>,
    pub unlimited: bool,
    pub upgrade_required: Option<PlanId>,
}

pub fn feature_status(plan: PlanId, feature: Feature) -> FeatureStatus {
    let cap = capability(plan, feature);
    let enabled = cap.is_enabled();
    let (limit, unlimited) = match cap {
        Capability::Limit(UNLIMITED) => (None, true),
        Capability::Limit(limit) => (Some(limit), false),
        Capability::Flag(_) => (None, false),
    };

    FeatureStatus {
        feature,
        enabled,
        limit,
        unlimited,
        upgrade_required: (!enabled).then(|| feature.suggested_upgrade()),
    }
}
