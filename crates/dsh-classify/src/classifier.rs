//! Advisory domain safety check backed by an LLM chat endpoint. The
//! verdict never gates a client reply; any failure degrades to Safe.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;

use crate::config::ClassifierConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Safe,
    Inappropriate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Social,
    Shopping,
    Gambling,
    Gaming,
    News,
    Education,
    Entertainment,
    Business,
    Technology,
    Health,
    Finance,
    Adult,
    Malicious,
    Search,
    Cloud,
    Government,
    Nonprofit,
    Other,
}

impl Category {
    fn from_keyword(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "social" => Self::Social,
            "shopping" => Self::Shopping,
            "gambling" => Self::Gambling,
            "gaming" => Self::Gaming,
            "news" => Self::News,
            "education" => Self::Education,
            "entertainment" => Self::Entertainment,
            "business" => Self::Business,
            "technology" => Self::Technology,
            "health" => Self::Health,
            "finance" => Self::Finance,
            "adult" => Self::Adult,
            "malicious" => Self::Malicious,
            "search" => Self::Search,
            "cloud" => Self::Cloud,
            "government" => Self::Government,
            "nonprofit" => Self::Nonprofit,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("{:?}", self).to_lowercase())
    }
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub verdict: Verdict,
    pub reason: String,
    pub category: Category,
}

impl Classification {
    fn safe(reason: &str) -> Self {
        Self {
            verdict: Verdict::Safe,
            reason: reason.to_string(),
            category: Category::Other,
        }
    }
}

pub struct DomainClassifier {
    client: reqwest::Client,
    config: ClassifierConfig,
    api_key: Option<String>,
}

impl DomainClassifier {
    pub fn new(config: ClassifierConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    /// Classify a domain. Disabled configuration, a missing key, and any
    /// transport or parse failure all yield a Safe verdict.
    pub async fn classify(&self, domain: &str) -> Classification {
        if !self.config.enabled {
            return Classification::safe("content checking disabled");
        }
        let Some(api_key) = self.api_key.as_deref() else {
            return Classification::safe("no API key configured");
        };
        match self.request(domain, api_key).await {
            Ok(classification) => classification,
            Err(e) => {
                debug!("content check failed for {}: {:#}", domain, e);
                Classification::safe("classifier unavailable")
            }
        }
    }

    async fn request(&self, domain: &str, api_key: &str) -> Result<Classification> {
        let prompt = format!(
            "Analyze the domain {domain} for potential harm, unethical content, or \
             security risks. Consider factors like malware, phishing, scams, \
             inappropriate content, and privacy concerns.\n\n\
             Respond with:\n\
             Risk Level: <low|medium|high>\n\
             Category: <social|shopping|gambling|gaming|news|education|entertainment|\
             business|technology|health|finance|adult|malicious|search|cloud|government|\
             nonprofit|other>\n\
             Reason: <short explanation>"
        );
        let body = json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a security expert analyzing domains for potential \
                                harm or unethical content. Provide a concise analysis."
                },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": 150,
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let reply: serde_json::Value = response.json().await?;
        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .context("missing content in classifier reply")?;
        Ok(parse_reply(content))
    }
}

/// Parse the structured "Risk Level / Category / Reason" reply. Missing
/// or unrecognized fields degrade toward Safe/Other.
pub(crate) fn parse_reply(content: &str) -> Classification {
    let mut risk = String::new();
    let mut category = Category::Other;
    let mut reason = String::new();

    for line in content.lines() {
        let lower = line.to_lowercase();
        if let Some(value) = lower.strip_prefix("risk level:") {
            risk = value.trim().to_string();
        } else if let Some(value) = lower.strip_prefix("category:") {
            category = Category::from_keyword(value);
        } else if lower.starts_with("reason:") {
            reason = line[7..].trim().to_string();
        }
    }

    // Anything above low risk is flagged; adult and malicious domains are
    // flagged regardless of the reported risk level.
    let verdict = if risk == "high"
        || risk == "medium"
        || matches!(category, Category::Adult | Category::Malicious)
    {
        Verdict::Inappropriate
    } else {
        Verdict::Safe
    };
    if reason.is_empty() {
        reason = "no reason given".to_string();
    }

    Classification {
        verdict,
        reason,
        category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_high_risk() {
        let c = parse_reply(
            "Risk Level: high\nCategory: gambling\nReason: online casino with no age checks",
        );
        assert_eq!(c.verdict, Verdict::Inappropriate);
        assert_eq!(c.category, Category::Gambling);
        assert_eq!(c.reason, "online casino with no age checks");
    }

    #[test]
    fn test_parse_reply_medium_risk() {
        let c = parse_reply(
            "Risk Level: medium\nCategory: gambling\nReason: sports betting with weak age gating",
        );
        assert_eq!(c.verdict, Verdict::Inappropriate);
        assert_eq!(c.category, Category::Gambling);
    }

    #[test]
    fn test_medium_risk_flags_ordinary_categories() {
        // Medium risk alone is enough; the category does not have to be
        // adult or malicious.
        let gaming = parse_reply("Risk Level: medium\nCategory: gaming\nReason: loot boxes");
        assert_eq!(gaming.verdict, Verdict::Inappropriate);
        assert_eq!(gaming.category, Category::Gaming);

        let shopping =
            parse_reply("Risk Level: medium\nCategory: shopping\nReason: dubious storefront");
        assert_eq!(shopping.verdict, Verdict::Inappropriate);
        assert_eq!(shopping.category, Category::Shopping);
    }

    #[test]
    fn test_parse_reply_low_risk() {
        let c = parse_reply("Risk Level: low\nCategory: news\nReason: major news outlet");
        assert_eq!(c.verdict, Verdict::Safe);
        assert_eq!(c.category, Category::News);
    }

    #[test]
    fn test_low_risk_ordinary_category_stays_safe() {
        // Only the risk level drives the verdict for categories outside
        // adult/malicious.
        let c = parse_reply("Risk Level: low\nCategory: gambling\nReason: state lottery site");
        assert_eq!(c.verdict, Verdict::Safe);
        assert_eq!(c.category, Category::Gambling);
    }

    #[test]
    fn test_adult_category_is_inappropriate_regardless_of_risk() {
        let c = parse_reply("Risk Level: low\nCategory: adult\nReason: explicit content");
        assert_eq!(c.verdict, Verdict::Inappropriate);
    }

    #[test]
    fn test_parse_reply_garbage_degrades_to_safe() {
        let c = parse_reply("I cannot comply with that request.");
        assert_eq!(c.verdict, Verdict::Safe);
        assert_eq!(c.category, Category::Other);
        assert_eq!(c.reason, "no reason given");
    }

    #[tokio::test]
    async fn test_disabled_classifier_is_safe() {
        let config = ClassifierConfig {
            enabled: false,
            ..Default::default()
        };
        let classifier = DomainClassifier::new(config, Some("sk-test".into())).unwrap();
        let c = classifier.classify("example.com").await;
        assert_eq!(c.verdict, Verdict::Safe);
    }

    #[tokio::test]
    async fn test_missing_key_is_safe() {
        let classifier = DomainClassifier::new(ClassifierConfig::default(), None).unwrap();
        let c = classifier.classify("example.com").await;
        assert_eq!(c.verdict, Verdict::Safe);
        assert_eq!(c.reason, "no API key configured");
    }
}
