use crate::errors::AppError;
use serde::{Deserialize, Deserializer, Serialize};

/// Treats an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Trimmed string, with empty or blank input read as `None`.
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

// ============ Entities ============

/// Loan-scoped role of an entity. The discriminants are the index wire ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowerType {
    Main = 0,
    Joint = 1,
    Guarantor = 2,
    Other = 3,
    Possible = 4,
    Heir = 5,
}

impl BorrowerType {
    pub const ALL: [BorrowerType; 6] = [
        BorrowerType::Main,
        BorrowerType::Joint,
        BorrowerType::Guarantor,
        BorrowerType::Other,
        BorrowerType::Possible,
        BorrowerType::Heir,
    ];

    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.id() == id)
    }

    pub fn label(self) -> &'static str {
        match self {
            BorrowerType::Main => "Main Borrower",
            BorrowerType::Joint => "Joint Borrower",
            BorrowerType::Guarantor => "Guarantor",
            BorrowerType::Other => "Others",
            BorrowerType::Possible => "Possible Guarantor Borrower",
            BorrowerType::Heir => "Erede Borrower",
        }
    }
}

/// Label for a raw role id, falling back to `(<id>)` for ids the index
/// knows about and this service does not.
pub fn borrower_type_label(id: i32) -> String {
    BorrowerType::from_id(id)
        .map(|t| t.label().to_string())
        .unwrap_or_else(|| format!("({})", id))
}

/// A single source-system record describing a person or company.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entity {
    #[serde(deserialize_with = "null_as_default")]
    pub entity_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    /// Cross-source identity key.
    #[serde(deserialize_with = "null_as_default")]
    pub fiscal_code: String,
    #[serde(deserialize_with = "null_as_default")]
    pub unique_loan_id: String,
    /// Internal sequence id; the default sort key.
    pub borrower_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub unique_borrower_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub borrower_type_id: i32,
    #[serde(deserialize_with = "null_as_default")]
    pub investigation_info_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub is_company: bool,
    pub is_deceased: Option<bool>,
    #[serde(deserialize_with = "null_as_default")]
    pub gender: String,
    pub date_of_birth: Option<String>,
    pub date_of_death: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub country_of_birth: String,
    #[serde(deserialize_with = "null_as_default")]
    pub region_of_birth: String,
    #[serde(deserialize_with = "null_as_default")]
    pub province_of_birth: String,
    #[serde(deserialize_with = "null_as_default")]
    pub city_of_birth: String,
    pub place_of_birth: Option<String>,
    pub is_verified: Option<bool>,
    pub borrower_ndg: Option<String>,
    pub borrower_ref: Option<String>,
    pub borrower_gbv: Option<String>,
    pub guarantor_type: Option<String>,
    pub guarantor_limit: Option<String>,
    pub vat_number: Option<String>,
    pub dbt_data: Option<String>,
    pub originator: Option<String>,
    pub credit_type: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub source_system: String,
    #[serde(deserialize_with = "null_as_default")]
    pub source_details: String,
    pub file: Option<String>,
    pub sheet: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub entity_notes: String,
    #[serde(deserialize_with = "null_as_default")]
    pub created_date: String,
    #[serde(deserialize_with = "null_as_default")]
    pub modified_date: String,
    #[serde(deserialize_with = "null_as_default")]
    pub extracted_date: String,
}

impl Entity {
    pub fn borrower_type(&self) -> Option<BorrowerType> {
        BorrowerType::from_id(self.borrower_type_id)
    }

    /// Records without a fiscal code cannot be clustered.
    pub fn has_fiscal_code(&self) -> bool {
        !self.fiscal_code.trim().is_empty()
    }
}

// ============ Search filters ============

/// Keys a caller may constrain a search by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKey {
    IsCompany,
    Gender,
    SourceSystem,
    BorrowerTypeId,
    CountryOfBirth,
    ProvinceOfBirth,
    CityOfBirth,
}

impl FilterKey {
    pub const ALL: [FilterKey; 7] = [
        FilterKey::IsCompany,
        FilterKey::Gender,
        FilterKey::SourceSystem,
        FilterKey::BorrowerTypeId,
        FilterKey::CountryOfBirth,
        FilterKey::ProvinceOfBirth,
        FilterKey::CityOfBirth,
    ];

    /// Index field the key constrains.
    pub fn field(self) -> &'static str {
        match self {
            FilterKey::IsCompany => "is_company",
            FilterKey::Gender => "gender",
            FilterKey::SourceSystem => "source_system",
            FilterKey::BorrowerTypeId => "borrower_type_id",
            FilterKey::CountryOfBirth => "country_of_birth",
            FilterKey::ProvinceOfBirth => "province_of_birth",
            FilterKey::CityOfBirth => "city_of_birth",
        }
    }
}

/// Sparse set of search constraints.
///
/// A `None` field is "no constraint". Empty strings are never stored: setting
/// a key to an empty or blank value removes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_company: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "blank_as_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "blank_as_none")]
    pub source_system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub borrower_type_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "blank_as_none")]
    pub country_of_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "blank_as_none")]
    pub province_of_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "blank_as_none")]
    pub city_of_birth: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        FilterKey::ALL.iter().all(|key| self.get(*key).is_none())
    }

    /// Sets `key` from its textual form; `None` or blank clears it.
    pub fn set(&mut self, key: FilterKey, raw: Option<&str>) -> Result<(), AppError> {
        let value = raw.map(str::trim).filter(|v| !v.is_empty());
        let Some(value) = value else {
            self.clear(key);
            return Ok(());
        };

        match key {
            FilterKey::IsCompany => {
                let parsed = value.parse::<bool>().map_err(|_| {
                    AppError::InvalidInput(format!("is_company must be true or false, got '{}'", value))
                })?;
                self.is_company = Some(parsed);
            }
            FilterKey::BorrowerTypeId => {
                let parsed = value.parse::<i32>().map_err(|_| {
                    AppError::InvalidInput(format!("borrower_type_id must be an integer, got '{}'", value))
                })?;
                self.borrower_type_id = Some(parsed);
            }
            FilterKey::Gender => self.gender = Some(value.to_string()),
            FilterKey::SourceSystem => self.source_system = Some(value.to_string()),
            FilterKey::CountryOfBirth => self.country_of_birth = Some(value.to_string()),
            FilterKey::ProvinceOfBirth => self.province_of_birth = Some(value.to_string()),
            FilterKey::CityOfBirth => self.city_of_birth = Some(value.to_string()),
        }
        Ok(())
    }

    pub fn clear(&mut self, key: FilterKey) {
        match key {
            FilterKey::IsCompany => self.is_company = None,
            FilterKey::Gender => self.gender = None,
            FilterKey::SourceSystem => self.source_system = None,
            FilterKey::BorrowerTypeId => self.borrower_type_id = None,
            FilterKey::CountryOfBirth => self.country_of_birth = None,
            FilterKey::ProvinceOfBirth => self.province_of_birth = None,
            FilterKey::CityOfBirth => self.city_of_birth = None,
        }
    }

    /// Textual value of `key`, if constrained.
    pub fn get(&self, key: FilterKey) -> Option<String> {
        match key {
            FilterKey::IsCompany => self.is_company.map(|v| v.to_string()),
            FilterKey::Gender => self.gender.clone(),
            FilterKey::SourceSystem => self.source_system.clone(),
            FilterKey::BorrowerTypeId => self.borrower_type_id.map(|v| v.to_string()),
            FilterKey::CountryOfBirth => self.country_of_birth.clone(),
            FilterKey::ProvinceOfBirth => self.province_of_birth.clone(),
            FilterKey::CityOfBirth => self.city_of_birth.clone(),
        }
        .filter(|v| !v.trim().is_empty())
    }
}

/// Caller-facing search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub query: Option<String>,
    pub filters: SearchFilters,
    pub page: u32,
    pub per_page: u32,
    pub sort_by: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query: None,
            filters: SearchFilters::default(),
            page: 1,
            per_page: 20,
            sort_by: None,
        }
    }
}

// ============ Results ============

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacetValueCount {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacetCount {
    pub field_name: String,
    #[serde(default)]
    pub counts: Vec<FacetValueCount>,
}

/// One page of a list-shaped operation.
///
/// A failed query yields an empty page with `error` set, so the caller always
/// has something renderable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPage<T> {
    pub results: Vec<T>,
    pub found: u64,
    pub page: u32,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<FacetCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ResultPage<T> {
    pub fn empty(page: u32) -> Self {
        Self {
            results: Vec::new(),
            found: 0,
            page,
            total_pages: 0,
            facets: Vec::new(),
            error: None,
        }
    }

    pub fn failed(page: u32, error: &AppError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::empty(page)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

pub type SearchResult = ResultPage<Entity>;

/// `ceil(found / per_page)`, zero when `per_page` is zero.
pub fn total_pages(found: u64, per_page: u32) -> u32 {
    if per_page == 0 {
        return 0;
    }
    let pages = found.div_ceil(u64::from(per_page));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// One autocomplete row, deduplicated by fiscal code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutocompleteSuggestion {
    /// Equal to `fiscal_code`.
    pub id: String,
    pub name: String,
    pub fiscal_code: String,
    /// Comma-joined when the fiscal code appears in several sources.
    pub source_system: String,
}

/// Request for co-obligors on one loan in one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanSearchParams {
    pub source_system: String,
    pub unique_loan_id: String,
    pub borrower_type: BorrowerType,
    pub page: u32,
    pub per_page: u32,
    pub sort_by: Option<String>,
}

impl LoanSearchParams {
    pub fn new(
        source_system: impl Into<String>,
        unique_loan_id: impl Into<String>,
        borrower_type: BorrowerType,
    ) -> Self {
        Self {
            source_system: source_system.into(),
            unique_loan_id: unique_loan_id.into(),
            borrower_type,
            page: 1,
            per_page: 20,
            sort_by: None,
        }
    }
}

// ============ Related records ============

/// Where a related record came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provenance {
    pub borrower_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub entity_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub fiscal_code: String,
    #[serde(deserialize_with = "null_as_default")]
    pub source_system: String,
    pub file: Option<String>,
    pub sheet: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub unique_borrower_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub created_date: String,
    #[serde(deserialize_with = "null_as_default")]
    pub modified_date: String,
    #[serde(deserialize_with = "null_as_default")]
    pub extracted_date: String,
}

/// How far an origin address can be trusted to match its validated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
    Unknown,
}

impl MatchConfidence {
    /// Scores are percentages in `[0, 100]`.
    pub fn from_score(score: Option<f64>) -> Self {
        match score {
            Some(s) if s >= 80.0 => MatchConfidence::High,
            Some(s) if s >= 50.0 => MatchConfidence::Medium,
            Some(_) => MatchConfidence::Low,
            None => MatchConfidence::Unknown,
        }
    }
}

/// Validated address with the origin address it was matched from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressFields {
    pub address_type: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub address_category: String,
    pub street: Option<String>,
    pub locality: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub postcode: Option<String>,
    pub full_address: Option<String>,
    pub origin_street: Option<String>,
    pub origin_city: Option<String>,
    pub origin_province: Option<String>,
    pub full_origin_address: Option<String>,
    pub address_notes: Option<String>,
    pub similar_score: Option<f64>,
}

impl AddressFields {
    pub fn confidence(&self) -> MatchConfidence {
        MatchConfidence::from_score(self.similar_score)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(flatten)]
    pub provenance: Provenance,
    #[serde(flatten)]
    pub address: AddressFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(flatten)]
    pub provenance: Provenance,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_pec: Option<bool>,
    #[serde(default)]
    pub is_verified: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bank {
    #[serde(flatten)]
    pub provenance: Provenance,
    #[serde(default)]
    pub bank_abi: Option<String>,
    #[serde(default)]
    pub bank_cab: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub account_type: Option<String>,
}

/// Employer address as seen on a job record (legal seat or place of operation).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobAddress {
    pub address_category: Option<String>,
    pub origin_province: Option<String>,
    pub origin_city: Option<String>,
    pub origin_street: Option<String>,
    pub address_type: Option<String>,
    pub street: Option<String>,
    pub locality: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub region: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
    pub similar_score: Option<f64>,
    pub address_notes: Option<String>,
}

impl JobAddress {
    pub fn confidence(&self) -> MatchConfidence {
        MatchConfidence::from_score(self.similar_score)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "JobDocument")]
pub struct Job {
    #[serde(flatten)]
    pub provenance: Provenance,
    pub job_reference: Option<i64>,
    pub reference: Option<i64>,
    pub employer_name: Option<String>,
    pub employer_tax_code: Option<String>,
    pub employer_vat_number: Option<i64>,
    pub employer_phone: Option<String>,
    pub employer_fax: Option<String>,
    pub monthly_income: Option<f64>,
    pub income_range: Option<String>,
    pub pension_category: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub work_activity_notes: Option<String>,
    pub legal_address: JobAddress,
    pub operation_address: JobAddress,
}

/// Job as stored in the index: both addresses flattened into prefixed columns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct JobDocument {
    #[serde(flatten)]
    provenance: Provenance,
    job_reference: Option<i64>,
    reference: Option<i64>,
    employer_name: Option<String>,
    employer_tax_code: Option<String>,
    employer_vat_number: Option<i64>,
    employer_phone: Option<String>,
    employer_fax: Option<String>,
    monthly_income: Option<f64>,
    income_range: Option<String>,
    pension_category: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    work_activity_notes: Option<String>,

    legal_address_category: Option<String>,
    legal_origin_province: Option<String>,
    legal_origin_city: Option<String>,
    legal_origin_street: Option<String>,
    legal_address_type: Option<String>,
    legal_street: Option<String>,
    legal_locality: Option<String>,
    legal_city: Option<String>,
    legal_province: Option<String>,
    legal_region: Option<String>,
    legal_postcode: Option<String>,
    legal_country: Option<String>,
    legal_similar_score: Option<f64>,
    legal_address_notes: Option<String>,

    operation_address_category: Option<String>,
    operation_origin_province: Option<String>,
    operation_origin_city: Option<String>,
    operation_origin_street: Option<String>,
    operation_address_type: Option<String>,
    operation_street: Option<String>,
    operation_locality: Option<String>,
    operation_city: Option<String>,
    operation_province: Option<String>,
    operation_region: Option<String>,
    operation_postcode: Option<String>,
    operation_country: Option<String>,
    operation_similar_score: Option<f64>,
    operation_address_notes: Option<String>,
}

impl From<JobDocument> for Job {
    fn from(doc: JobDocument) -> Self {
        Job {
            provenance: doc.provenance,
            job_reference: doc.job_reference,
            reference: doc.reference,
            employer_name: doc.employer_name,
            employer_tax_code: doc.employer_tax_code,
            employer_vat_number: doc.employer_vat_number,
            employer_phone: doc.employer_phone,
            employer_fax: doc.employer_fax,
            monthly_income: doc.monthly_income,
            income_range: doc.income_range,
            pension_category: doc.pension_category,
            start_date: doc.start_date,
            end_date: doc.end_date,
            work_activity_notes: doc.work_activity_notes,
            legal_address: JobAddress {
                address_category: doc.legal_address_category,
                origin_province: doc.legal_origin_province,
                origin_city: doc.legal_origin_city,
                origin_street: doc.legal_origin_street,
                address_type: doc.legal_address_type,
                street: doc.legal_street,
                locality: doc.legal_locality,
                city: doc.legal_city,
                province: doc.legal_province,
                region: doc.legal_region,
                postcode: doc.legal_postcode,
                country: doc.legal_country,
                similar_score: doc.legal_similar_score,
                address_notes: doc.legal_address_notes,
            },
            operation_address: JobAddress {
                address_category: doc.operation_address_category,
                origin_province: doc.operation_origin_province,
                origin_city: doc.operation_origin_city,
                origin_street: doc.operation_origin_street,
                address_type: doc.operation_address_type,
                street: doc.operation_street,
                locality: doc.operation_locality,
                city: doc.operation_city,
                province: doc.operation_province,
                region: doc.operation_region,
                postcode: doc.operation_postcode,
                country: doc.operation_country,
                similar_score: doc.operation_similar_score,
                address_notes: doc.operation_address_notes,
            },
        }
    }
}

/// Cadastral asset, located at an address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(flatten)]
    pub provenance: Provenance,
    #[serde(flatten)]
    pub address: AddressFields,
    #[serde(default)]
    pub asset_sub: Option<i64>,
    #[serde(default)]
    pub asset_zone: Option<String>,
    #[serde(default)]
    pub asset_class: Option<String>,
    #[serde(default)]
    pub asset_sheet: Option<String>,
    #[serde(default)]
    pub asset_category: Option<String>,
    #[serde(default)]
    pub asset_dimension: Option<String>,
    #[serde(default)]
    pub asset_particle_sub: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub cadastral_tax_base: Option<String>,
    #[serde(default)]
    pub asset_ownership: Option<String>,
    #[serde(default)]
    pub asset_compr_avg: Option<f64>,
    #[serde(default)]
    pub est_asset_value: Option<f64>,
    #[serde(default)]
    pub est_ownership_value: Option<f64>,
}
