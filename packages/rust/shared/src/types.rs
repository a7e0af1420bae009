//! Core domain types for discovered business entities.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SourcingError;

/// Provenance tag used for values entered by hand; enrichers never overwrite them.
pub const MANUAL_SOURCE: &str = "manual";

// ---------------------------------------------------------------------------
// IdentityKey
// ---------------------------------------------------------------------------

/// Deduplication key for an entity: a UUID v5 derived from the normalized web
/// domain, or from `name|address` when no domain is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(pub Uuid);

impl IdentityKey {
    /// Key for an already-normalized domain (e.g. `acme.com`).
    pub fn from_domain(domain: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, domain.as_bytes()))
    }

    /// Fallback key from the listing's name and formatted address.
    pub fn from_name_address(name: &str, address: Option<&str>) -> Self {
        let raw = format!(
            "{}|{}",
            name.to_lowercase(),
            address.unwrap_or_default().to_lowercase()
        );
        Self(Uuid::new_v5(&Uuid::NAMESPACE_DNS, raw.as_bytes()))
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for IdentityKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Normalize a website to its bare host: lowercase, no scheme, no leading
/// `www.`, no port or path. `None` when no host can be parsed.
pub fn normalize_domain(website: &str) -> Option<String> {
    let trimmed = website.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = url::Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}

// ---------------------------------------------------------------------------
// ProcessingStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an entity's enrichment. Ordering is the only legal
/// direction of travel: `Unprocessed < Partial < Complete`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Unprocessed,
    Partial,
    Complete,
}

impl ProcessingStatus {
    /// Column value stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Partial => "partial",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = SourcingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "unprocessed" => Ok(Self::Unprocessed),
            "partial" => Ok(Self::Partial),
            "complete" => Ok(Self::Complete),
            other => Err(SourcingError::validation(format!(
                "unknown processing status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Risk signal
// ---------------------------------------------------------------------------

/// One article or page backing a risk finding.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskEvidence {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Structured negative-findings signal (legal trouble, financial distress).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskSignal {
    /// Free-form flag, e.g. `ALERT: Acme sued over ...` or `Clean (...)`.
    pub flag: String,
    /// Source items the flag was derived from.
    #[serde(default)]
    pub evidence: Vec<RiskEvidence>,
}

impl RiskSignal {
    /// Marker that turns a flag into an alert-level signal.
    pub const ALERT_MARKER: &'static str = "ALERT";

    /// A signal with no findings.
    pub fn clean(note: impl Into<String>) -> Self {
        Self {
            flag: format!("Clean ({})", note.into()),
            evidence: Vec::new(),
        }
    }

    /// Whether this signal carries an alert-level finding.
    pub fn is_alert(&self) -> bool {
        self.flag.contains(Self::ALERT_MARKER)
    }
}

// ---------------------------------------------------------------------------
// Fields and typed updates
// ---------------------------------------------------------------------------

/// An enrichable entity column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Website,
    Description,
    LinkedinCompanyUrl,
    OwnerLinkedinUrl,
    FacebookUrl,
    InstagramUrl,
    TwitterUrl,
    YoutubeUrl,
    IsEcommerce,
    TechStack,
    IndustryTag,
    LegalName,
    NaicsCode,
    NaicsDescription,
    CustomerType,
    RevenueModel,
    IsFamilyOwned,
    IsFranchise,
    OwnerName,
    OwnerSource,
    ContactEmail,
    EmployeeCount,
    RevenueEstimate,
    RiskSignal,
}

impl Field {
    /// Column name in the `entities` table (also the provenance key).
    pub fn column(&self) -> &'static str {
        match self {
            Self::Website => "website",
            Self::Description => "description",
            Self::LinkedinCompanyUrl => "linkedin_company_url",
            Self::OwnerLinkedinUrl => "owner_linkedin_url",
            Self::FacebookUrl => "facebook_url",
            Self::InstagramUrl => "instagram_url",
            Self::TwitterUrl => "twitter_url",
            Self::YoutubeUrl => "youtube_url",
            Self::IsEcommerce => "is_ecommerce",
            Self::TechStack => "tech_stack_json",
            Self::IndustryTag => "industry_tag",
            Self::LegalName => "legal_name",
            Self::NaicsCode => "naics_code",
            Self::NaicsDescription => "naics_description",
            Self::CustomerType => "customer_type",
            Self::RevenueModel => "revenue_model",
            Self::IsFamilyOwned => "is_family_owned",
            Self::IsFranchise => "is_franchise",
            Self::OwnerName => "owner_name",
            Self::OwnerSource => "owner_source",
            Self::ContactEmail => "contact_email",
            Self::EmployeeCount => "employee_count",
            Self::RevenueEstimate => "revenue_estimate",
            Self::RiskSignal => "risk_signal_json",
        }
    }

    /// Inverse of [`Field::column`].
    pub fn from_column(column: &str) -> Option<Self> {
        ALL_FIELDS.iter().copied().find(|f| f.column() == column)
    }
}

/// Every enrichable field, in column order.
pub const ALL_FIELDS: [Field; 24] = [
    Field::Website,
    Field::Description,
    Field::LinkedinCompanyUrl,
    Field::OwnerLinkedinUrl,
    Field::FacebookUrl,
    Field::InstagramUrl,
    Field::TwitterUrl,
    Field::YoutubeUrl,
    Field::IsEcommerce,
    Field::TechStack,
    Field::IndustryTag,
    Field::LegalName,
    Field::NaicsCode,
    Field::NaicsDescription,
    Field::CustomerType,
    Field::RevenueModel,
    Field::IsFamilyOwned,
    Field::IsFranchise,
    Field::OwnerName,
    Field::OwnerSource,
    Field::ContactEmail,
    Field::EmployeeCount,
    Field::RevenueEstimate,
    Field::RiskSignal,
];

/// A single typed field write produced by an enricher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldUpdate {
    Website(String),
    Description(String),
    LinkedinCompanyUrl(String),
    OwnerLinkedinUrl(String),
    FacebookUrl(String),
    InstagramUrl(String),
    TwitterUrl(String),
    YoutubeUrl(String),
    IsEcommerce(bool),
    TechStack(Vec<String>),
    IndustryTag(String),
    LegalName(String),
    NaicsCode(String),
    NaicsDescription(String),
    CustomerType(String),
    RevenueModel(String),
    IsFamilyOwned(bool),
    IsFranchise(bool),
    OwnerName(String),
    OwnerSource(String),
    ContactEmail(String),
    EmployeeCount(i64),
    RevenueEstimate(i64),
    RiskSignal(RiskSignal),
}

impl FieldUpdate {
    /// The column this update writes.
    pub fn field(&self) -> Field {
        match self {
            Self::Website(_) => Field::Website,
            Self::Description(_) => Field::Description,
            Self::LinkedinCompanyUrl(_) => Field::LinkedinCompanyUrl,
            Self::OwnerLinkedinUrl(_) => Field::OwnerLinkedinUrl,
            Self::FacebookUrl(_) => Field::FacebookUrl,
            Self::InstagramUrl(_) => Field::InstagramUrl,
            Self::TwitterUrl(_) => Field::TwitterUrl,
            Self::YoutubeUrl(_) => Field::YoutubeUrl,
            Self::IsEcommerce(_) => Field::IsEcommerce,
            Self::TechStack(_) => Field::TechStack,
            Self::IndustryTag(_) => Field::IndustryTag,
            Self::LegalName(_) => Field::LegalName,
            Self::NaicsCode(_) => Field::NaicsCode,
            Self::NaicsDescription(_) => Field::NaicsDescription,
            Self::CustomerType(_) => Field::CustomerType,
            Self::RevenueModel(_) => Field::RevenueModel,
            Self::IsFamilyOwned(_) => Field::IsFamilyOwned,
            Self::IsFranchise(_) => Field::IsFranchise,
            Self::OwnerName(_) => Field::OwnerName,
            Self::OwnerSource(_) => Field::OwnerSource,
            Self::ContactEmail(_) => Field::ContactEmail,
            Self::EmployeeCount(_) => Field::EmployeeCount,
            Self::RevenueEstimate(_) => Field::RevenueEstimate,
            Self::RiskSignal(_) => Field::RiskSignal,
        }
    }
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Which stage produced a field value, and how sure it was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Stage name (or [`MANUAL_SOURCE`]).
    pub stage: String,
    /// AI confidence in `[0, 1]`, when the stage reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Excerpt supporting a derived classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Stage ledger
// ---------------------------------------------------------------------------

/// Persisted state of one stage for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Succeeded,
    Failed,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for StageState {
    type Err = SourcingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(SourcingError::validation(format!(
                "unknown stage state '{other}'"
            ))),
        }
    }
}

/// Ledger row for an (entity, stage) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub state: StageState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub retryable: bool,
    pub last_attempt_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Score card
// ---------------------------------------------------------------------------

/// Component breakdown persisted next to the total score.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScoreCard {
    pub financial_size: i32,
    /// May be negative when the franchise disqualifier applies.
    pub quality: i32,
    pub actionability: i32,
    pub risk_penalty: i32,
    /// `clamp(financial + quality + actionability - risk_penalty, 0, 100)`.
    pub total: u8,
    /// Labels of the rules that fired, in evaluation order.
    #[serde(default)]
    pub reasons: Vec<String>,
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A discovered business record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: IdentityKey,
    pub name: String,

    // Directory listing attributes
    pub website: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
    pub directory_rating: Option<f64>,
    pub directory_reviews: Option<i64>,
    /// User the record is assigned to.
    pub owner_tag: Option<String>,

    // Enrichment attributes
    pub description: Option<String>,
    pub linkedin_company_url: Option<String>,
    pub owner_linkedin_url: Option<String>,
    pub facebook_url: Option<String>,
    pub instagram_url: Option<String>,
    pub twitter_url: Option<String>,
    pub youtube_url: Option<String>,
    pub is_ecommerce: Option<bool>,
    pub tech_stack: Vec<String>,
    pub industry_tag: Option<String>,
    pub legal_name: Option<String>,
    pub naics_code: Option<String>,
    pub naics_description: Option<String>,
    pub customer_type: Option<String>,
    pub revenue_model: Option<String>,
    pub is_family_owned: Option<bool>,
    pub is_franchise: Option<bool>,
    pub owner_name: Option<String>,
    pub owner_source: Option<String>,
    pub contact_email: Option<String>,
    pub employee_count: Option<i64>,
    pub revenue_estimate: Option<i64>,
    pub risk_signal: Option<RiskSignal>,

    // Processing bookkeeping
    pub status: ProcessingStatus,
    pub score: Option<u8>,
    pub score_card: Option<ScoreCard>,
    #[serde(default)]
    pub provenance: BTreeMap<Field, Provenance>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_enriched_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// A fresh, unprocessed entity with only its identity and name set.
    pub fn new(key: IdentityKey, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key,
            name: name.into(),
            website: None,
            phone: None,
            address: None,
            city: None,
            state: None,
            zip: None,
            country: None,
            directory_rating: None,
            directory_reviews: None,
            owner_tag: None,
            description: None,
            linkedin_company_url: None,
            owner_linkedin_url: None,
            facebook_url: None,
            instagram_url: None,
            twitter_url: None,
            youtube_url: None,
            is_ecommerce: None,
            tech_stack: Vec::new(),
            industry_tag: None,
            legal_name: None,
            naics_code: None,
            naics_description: None,
            customer_type: None,
            revenue_model: None,
            is_family_owned: None,
            is_franchise: None,
            owner_name: None,
            owner_source: None,
            contact_email: None,
            employee_count: None,
            revenue_estimate: None,
            risk_signal: None,
            status: ProcessingStatus::Unprocessed,
            score: None,
            score_card: None,
            provenance: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            last_enriched_at: None,
        }
    }

    /// Write a typed update into the matching field (last write wins).
    pub fn apply(&mut self, update: FieldUpdate) {
        match update {
            FieldUpdate::Website(v) => self.website = Some(v),
            FieldUpdate::Description(v) => self.description = Some(v),
            FieldUpdate::LinkedinCompanyUrl(v) => self.linkedin_company_url = Some(v),
            FieldUpdate::OwnerLinkedinUrl(v) => self.owner_linkedin_url = Some(v),
            FieldUpdate::FacebookUrl(v) => self.facebook_url = Some(v),
            FieldUpdate::InstagramUrl(v) => self.instagram_url = Some(v),
            FieldUpdate::TwitterUrl(v) => self.twitter_url = Some(v),
            FieldUpdate::YoutubeUrl(v) => self.youtube_url = Some(v),
            FieldUpdate::IsEcommerce(v) => self.is_ecommerce = Some(v),
            FieldUpdate::TechStack(v) => self.tech_stack = v,
            FieldUpdate::IndustryTag(v) => self.industry_tag = Some(v),
            FieldUpdate::LegalName(v) => self.legal_name = Some(v),
            FieldUpdate::NaicsCode(v) => self.naics_code = Some(v),
            FieldUpdate::NaicsDescription(v) => self.naics_description = Some(v),
            FieldUpdate::CustomerType(v) => self.customer_type = Some(v),
            FieldUpdate::RevenueModel(v) => self.revenue_model = Some(v),
            FieldUpdate::IsFamilyOwned(v) => self.is_family_owned = Some(v),
            FieldUpdate::IsFranchise(v) => self.is_franchise = Some(v),
            FieldUpdate::OwnerName(v) => self.owner_name = Some(v),
            FieldUpdate::OwnerSource(v) => self.owner_source = Some(v),
            FieldUpdate::ContactEmail(v) => self.contact_email = Some(v),
            FieldUpdate::EmployeeCount(v) => self.employee_count = Some(v),
            FieldUpdate::RevenueEstimate(v) => self.revenue_estimate = Some(v),
            FieldUpdate::RiskSignal(v) => self.risk_signal = Some(v),
        }
    }

    /// Whether a field's current value was entered by hand.
    pub fn is_manual(&self, field: Field) -> bool {
        self.provenance
            .get(&field)
            .is_some_and(|p| p.stage == MANUAL_SOURCE)
    }

    /// Whether the customer type names business customers, e.g. `B2B`,
    /// `B2B/Commercial` or `Commercial`.
    pub fn sells_to_businesses(&self) -> bool {
        self.customer_type.as_deref().is_some_and(|raw| {
            let customer = raw.to_lowercase();
            customer.contains("b2b") || customer.contains("commercial")
        })
    }
}
