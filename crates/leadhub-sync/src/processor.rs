use std::collections::HashSet;

use leadhub_adapters::{CompanyCache, CompanyInfoScraper};
use leadhub_core::normalize::{
    clean_text, contains_role_term, contains_term, normalize_company_name, normalize_profile_url,
    normalize_whitespace,
};
use leadhub_core::{AcquisitionError, CompanyProfile, ErrorKind, LeadSource, RawLeadRecord};
use leadhub_storage::{leads, CompanyUpsert, Database, LeadUpsert, UpsertAction};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{Criteria, ScoringWeights};

/// A raw record together with the query that surfaced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub source: LeadSource,
    pub record: RawLeadRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateLead {
    pub name: String,
    pub profile_url: String,
    pub role: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub alma_mater: Vec<String>,
    pub source: LeadSource,
    pub company_profile: Option<CompanyProfile>,
    pub score: f64,
}

impl CandidateLead {
    pub fn alma_mater_tag(&self) -> Option<String> {
        (!self.alma_mater.is_empty()).then(|| self.alma_mater.join(", "))
    }

    fn to_upsert(&self) -> LeadUpsert {
        let company = self.company.as_ref().map(|name| {
            let company = CompanyUpsert::named(name.as_str());
            match &self.company_profile {
                Some(profile) => company.with_profile(profile),
                None => company,
            }
        });
        LeadUpsert {
            name: self.name.clone(),
            profile_url: self.profile_url.clone(),
            current_role: self.role.clone(),
            company,
            alma_mater_match: self.alma_mater_tag(),
            location: self.location.clone(),
            source_of_lead: self.source.to_string(),
            score: self.score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clean,
    Enrich,
    Persist,
}

/// A single record that could not be carried through a stage. The run goes on without it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub stage: Stage,
    pub subject: String,
    pub kind: Option<ErrorKind>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessSummary {
    pub raw: usize,
    pub cleaned: usize,
    pub enriched: usize,
    pub filtered_in: usize,
    pub persisted: usize,
    pub created: usize,
    pub updated: usize,
    pub record_failures: Vec<RecordFailure>,
    pub persisted_lead_ids: Vec<i64>,
}

/// Leads that made it through clean, enrich, filter and score, ordered best first, waiting
/// to be persisted.
#[derive(Debug, Clone, Default)]
pub struct PreparedLeads {
    pub leads: Vec<CandidateLead>,
    pub summary: ProcessSummary,
}

pub struct LeadProcessor {
    criteria: Criteria,
    weights: ScoringWeights,
    company_info: CompanyInfoScraper,
    db: Database,
}

impl LeadProcessor {
    pub fn new(
        criteria: Criteria,
        weights: ScoringWeights,
        company_info: CompanyInfoScraper,
        db: Database,
    ) -> Self {
        Self {
            criteria,
            weights,
            company_info,
            db,
        }
    }

    /// Runs every stage and persists the survivors. Only an unclassified error escapes;
    /// anything else is recorded against the record it hit.
    pub async fn process(
        &self,
        sightings: Vec<Sighting>,
    ) -> Result<ProcessSummary, AcquisitionError> {
        let prepared = self.prepare(sightings).await?;
        Ok(self.persist(prepared).await)
    }

    /// Clean, enrich, filter and score. The company cache lives for this call only.
    pub async fn prepare(
        &self,
        sightings: Vec<Sighting>,
    ) -> Result<PreparedLeads, AcquisitionError> {
        let span = info_span!("prepare_leads", raw = sightings.len());
        async {
            let mut summary = ProcessSummary {
                raw: sightings.len(),
                ..Default::default()
            };

            let mut leads = self.clean(sightings, &mut summary.record_failures);
            summary.cleaned = leads.len();

            let mut cache = CompanyCache::new();
            self.enrich(&mut leads, &mut cache, &mut summary.record_failures)
                .await?;
            summary.enriched = leads.iter().filter(|l| l.company_profile.is_some()).count();

            let leads = self.score(self.filter(leads));
            summary.filtered_in = leads.len();

            info!(
                raw = summary.raw,
                cleaned = summary.cleaned,
                enriched = summary.enriched,
                filtered_in = summary.filtered_in,
                companies_looked_up = cache.len(),
                "leads prepared"
            );
            Ok(PreparedLeads { leads, summary })
        }
        .instrument(span)
        .await
    }

    /// Normalizes fields, drops records without a usable profile URL or name, and keeps the
    /// first sighting of each profile.
    pub fn clean(
        &self,
        sightings: Vec<Sighting>,
        failures: &mut Vec<RecordFailure>,
    ) -> Vec<CandidateLead> {
        let mut seen = HashSet::new();
        let mut leads = Vec::with_capacity(sightings.len());

        for Sighting { source, record } in sightings {
            let Some(profile_url) = normalize_profile_url(&record.profile_url) else {
                failures.push(clean_failure(&record, "missing profile url"));
                continue;
            };
            let Some(name) = clean_text(Some(&record.name)) else {
                failures.push(clean_failure(&record, "missing name"));
                continue;
            };
            if !seen.insert(profile_url.clone()) {
                debug!(profile_url = %profile_url, "duplicate sighting collapsed");
                continue;
            }

            let alma_mater = self.alma_mater(&record, &source);
            leads.push(CandidateLead {
                name,
                profile_url,
                role: clean_text(record.role.as_deref()),
                company: clean_text(record.company.as_deref())
                    .map(|c| normalize_company_name(&c))
                    .filter(|c| !c.is_empty()),
                location: clean_text(record.location.as_deref()),
                alma_mater,
                source,
                company_profile: None,
                score: 0.0,
            });
        }
        leads
    }

    fn alma_mater(&self, record: &RawLeadRecord, source: &LeadSource) -> Vec<String> {
        let mut schools = Vec::new();
        if let LeadSource::Alumni { school } = source {
            let school = normalize_whitespace(school);
            if !school.is_empty() {
                schools.push(school);
            }
        }
        let text = format!("{} {}", record.title, record.snippet);
        for school in &self.criteria.target_schools {
            let school = normalize_whitespace(school);
            let seen = schools.iter().any(|s| s.eq_ignore_ascii_case(&school));
            if !seen && contains_term(&text, &school) {
                schools.push(school);
            }
        }
        schools
    }

    /// Attaches company profiles. Each company costs one lookup through `cache`; a failed
    /// lookup is recorded and treated as no match.
    pub async fn enrich(
        &self,
        leads: &mut [CandidateLead],
        cache: &mut CompanyCache,
        failures: &mut Vec<RecordFailure>,
    ) -> Result<(), AcquisitionError> {
        for lead in leads.iter_mut() {
            let Some(company) = lead.company.as_deref() else {
                continue;
            };
            match self.company_info.lookup(cache, company).await {
                Ok(profile) => lead.company_profile = profile,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(company, error = %err, "company lookup failed");
                    failures.push(RecordFailure {
                        stage: Stage::Enrich,
                        subject: company.to_string(),
                        kind: Some(err.kind()),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn filter(&self, leads: Vec<CandidateLead>) -> Vec<CandidateLead> {
        leads
            .into_iter()
            .filter(|lead| {
                let keep = self.matches_criteria(lead);
                if !keep {
                    debug!(
                        profile_url = %lead.profile_url,
                        role = ?lead.role,
                        location = ?lead.location,
                        "lead filtered out"
                    );
                }
                keep
            })
            .collect()
    }

    /// Location contains an allowed location, role names a wanted keyword, and role names
    /// no excluded seniority. An empty allow list disables its check.
    pub fn matches_criteria(&self, lead: &CandidateLead) -> bool {
        let criteria = &self.criteria;
        let location_ok = criteria.target_locations.is_empty()
            || lead.location.as_deref().is_some_and(|location| {
                let location = location.to_lowercase();
                criteria
                    .target_locations
                    .iter()
                    .map(|t| normalize_whitespace(t).to_lowercase())
                    .any(|t| !t.is_empty() && location.contains(&t))
            });

        let role = lead.role.as_deref().unwrap_or_default();
        let keyword_ok = criteria.role_keywords.is_empty()
            || criteria.role_keywords.iter().any(|k| contains_role_term(role, k));
        let excluded = criteria
            .seniority_exclusions
            .iter()
            .any(|k| contains_term(role, k));

        location_ok && keyword_ok && !excluded
    }

    pub fn score_lead(&self, lead: &CandidateLead) -> f64 {
        let w = &self.weights;
        let role = lead.role.as_deref().unwrap_or_default();
        let keyword_words = self
            .criteria
            .role_keywords
            .iter()
            .filter(|k| contains_role_term(role, k))
            .map(|k| k.split_whitespace().count())
            .max()
            .unwrap_or(0);

        let mut score = w.base + w.keyword_weight * keyword_words as f64;
        if !lead.alma_mater.is_empty() {
            score += w.alma_mater_bonus;
        }
        if lead.company_profile.is_some() {
            score += w.enrichment_bonus;
        }
        score
    }

    /// Scores every lead and orders them best first, ties broken by profile URL.
    pub fn score(&self, mut leads: Vec<CandidateLead>) -> Vec<CandidateLead> {
        for lead in &mut leads {
            lead.score = self.score_lead(lead);
        }
        leads.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.profile_url.cmp(&b.profile_url))
        });
        leads
    }

    /// Upserts each prepared lead with its company. A failed write is recorded and the rest
    /// carry on.
    pub async fn persist(&self, prepared: PreparedLeads) -> ProcessSummary {
        let PreparedLeads {
            leads: candidates,
            mut summary,
        } = prepared;
        let span = info_span!("persist_leads", leads = candidates.len());
        async {
            for lead in &candidates {
                match leads::upsert_lead(self.db.pool(), &lead.to_upsert()).await {
                    Ok(outcome) => {
                        summary.persisted += 1;
                        match outcome.action {
                            UpsertAction::Created => summary.created += 1,
                            UpsertAction::Updated => summary.updated += 1,
                        }
                        summary.persisted_lead_ids.push(outcome.lead_id);
                    }
                    Err(err) => {
                        warn!(profile_url = %lead.profile_url, error = %err, "lead write failed");
                        summary.record_failures.push(RecordFailure {
                            stage: Stage::Persist,
                            subject: lead.profile_url.clone(),
                            kind: None,
                            message: err.to_string(),
                        });
                    }
                }
            }
            info!(
                persisted = summary.persisted,
                created = summary.created,
                updated = summary.updated,
                "leads persisted"
            );
        }
        .instrument(span)
        .await;
        summary
    }
}

fn clean_failure(record: &RawLeadRecord, message: &str) -> RecordFailure {
    debug!(profile_url = %record.profile_url, name = %record.name, message, "record dropped");
    RecordFailure {
        stage: Stage::Clean,
        subject: if record.profile_url.trim().is_empty() {
            record.name.clone()
        } else {
            record.profile_url.clone()
        },
        kind: None,
        message: message.to_string(),
    }
}
