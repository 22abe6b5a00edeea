//! The closed set of business topics feedback can be clustered into.
//!
//! These string values are part of the structured-output contract with the LLM:
//! the analysis prompt lists them verbatim, and anything else the model returns
//! is discarded on ingest.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTopic {
    ProductFunctionalityFeatures,
    UiUx,
    PerformanceReliability,
    SecurityPrivacy,
    PricingBilling,
    CustomerSupport,
    OnboardingDocumentation,
    IntegrationsApi,
    AccountAccess,
    DataReporting,
    MobileExperience,
    FeatureRequests,
    Other,
}

impl FeedbackTopic {
    pub const ALL: [FeedbackTopic; 13] = [
        FeedbackTopic::ProductFunctionalityFeatures,
        FeedbackTopic::UiUx,
        FeedbackTopic::PerformanceReliability,
        FeedbackTopic::SecurityPrivacy,
        FeedbackTopic::PricingBilling,
        FeedbackTopic::CustomerSupport,
        FeedbackTopic::OnboardingDocumentation,
        FeedbackTopic::IntegrationsApi,
        FeedbackTopic::AccountAccess,
        FeedbackTopic::DataReporting,
        FeedbackTopic::MobileExperience,
        FeedbackTopic::FeatureRequests,
        FeedbackTopic::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackTopic::ProductFunctionalityFeatures => "product_functionality_features",
            FeedbackTopic::UiUx => "ui_ux",
            FeedbackTopic::PerformanceReliability => "performance_reliability",
            FeedbackTopic::SecurityPrivacy => "security_privacy",
            FeedbackTopic::PricingBilling => "pricing_billing",
            FeedbackTopic::CustomerSupport => "customer_support",
            FeedbackTopic::OnboardingDocumentation => "onboarding_documentation",
            FeedbackTopic::IntegrationsApi => "integrations_api",
            FeedbackTopic::AccountAccess => "account_access",
            FeedbackTopic::DataReporting => "data_reporting",
            FeedbackTopic::MobileExperience => "mobile_experience",
            FeedbackTopic::FeatureRequests => "feature_requests",
            FeedbackTopic::Other => "other",
        }
    }

    /// Human-readable description used in the analysis prompt.
    pub fn description(&self) -> &'static str {
        match self {
            FeedbackTopic::ProductFunctionalityFeatures => {
                "How existing product features work, bugs, missing behaviour"
            }
            FeedbackTopic::UiUx => "Layout, navigation, visual design, ease of use",
            FeedbackTopic::PerformanceReliability => "Speed, latency, crashes, outages",
            FeedbackTopic::SecurityPrivacy => "Data protection, permissions, trust",
            FeedbackTopic::PricingBilling => "Plans, invoices, payment, perceived value",
            FeedbackTopic::CustomerSupport => "Support responsiveness and quality",
            FeedbackTopic::OnboardingDocumentation => "Getting started, guides, docs",
            FeedbackTopic::IntegrationsApi => "Third-party integrations, public API",
            FeedbackTopic::AccountAccess => "Sign-up, login, account management",
            FeedbackTopic::DataReporting => "Exports, dashboards, analytics",
            FeedbackTopic::MobileExperience => "Mobile apps and small-screen usage",
            FeedbackTopic::FeatureRequests => "Requests for new capabilities",
            FeedbackTopic::Other => "Anything that fits none of the above",
        }
    }

    /// Renders the catalogue as prompt lines: `- value: description`.
    pub fn catalogue() -> String {
        Self::ALL
            .iter()
            .map(|t| format!("- {}: {}", t.as_str(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromStr for FeedbackTopic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| format!("unknown topic '{needle}'"))
    }
}

impl fmt::Display for FeedbackTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
