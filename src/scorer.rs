use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::ai::{self, AIProvider};
use crate::config::ScoringPolicy;
use crate::models::{CandidateProfile, RawLead, ScoredLead, Seniority};
use crate::profile;

/// The judge's verdict for one lead.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchAnalysis {
    #[serde(default)]
    pub is_match: bool,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub reason: String,
}

impl MatchAnalysis {
    fn rejected(reason: String) -> Self {
        Self {
            is_match: false,
            score: 0,
            reason,
        }
    }
}

/// Senior or lead postings against an intern/junior candidate.
pub fn seniority_mismatch(candidate: Seniority, title: &str) -> bool {
    candidate.is_early_career()
        && matches!(profile::title_level(title), Some(Seniority::Senior | Seniority::Lead))
}

pub struct RelevanceScorer<'a> {
    provider: &'a dyn AIProvider,
    policy: &'a ScoringPolicy,
    concurrency: usize,
}

impl<'a> RelevanceScorer<'a> {
    pub fn new(provider: &'a dyn AIProvider, policy: &'a ScoringPolicy, concurrency: usize) -> Self {
        Self {
            provider,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    /// Scores every lead independently and returns the accepted ones, best
    /// first, at most `limit`. Equal scores keep their input order.
    pub async fn score(&self, leads: Vec<RawLead>, profile: &CandidateProfile, limit: usize) -> Vec<ScoredLead> {
        info!("Scoring {} leads against profile", leads.len());

        let analyses: Vec<(RawLead, MatchAnalysis)> = stream::iter(leads)
            .map(|lead| async move {
                let analysis = self.analyze(&lead, profile).await;
                (lead, analysis)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut accepted: Vec<ScoredLead> = analyses
            .into_iter()
            .filter_map(|(lead, analysis)| {
                if self.accepts(&lead, &analysis, profile) {
                    Some(ScoredLead {
                        lead,
                        score: analysis.score.clamp(0, 100) as u8,
                        reason: analysis.reason,
                    })
                } else {
                    debug!("Rejected '{}' ({}): {}", lead.title, analysis.score, analysis.reason);
                    None
                }
            })
            .collect();

        // Stable sort keeps encounter order among ties
        accepted.sort_by(|a, b| b.score.cmp(&a.score));
        accepted.truncate(limit);
        info!("{} leads accepted", accepted.len());
        accepted
    }

    fn accepts(&self, lead: &RawLead, analysis: &MatchAnalysis, profile: &CandidateProfile) -> bool {
        if !analysis.is_match || analysis.score <= self.policy.threshold as i64 {
            return false;
        }
        !(self.policy.reject_seniority_mismatch && seniority_mismatch(profile.seniority, &lead.title))
    }

    async fn analyze(&self, lead: &RawLead, profile: &CandidateProfile) -> MatchAnalysis {
        let prompt = format!(
            "Act as a strict recruiter. Compare candidate and job.\n\n\
            CANDIDATE:\nSummary: {}\nSkills: {}\nLevel: {}\n\n\
            JOB:\nTitle: {}\nCompany: {}\nQuery used: {}\nSnippet: {}\n\n\
            TASK:\n\
            1. Seniority: reject Senior/Lead/Manager roles if the candidate is Junior or Intern.\n\
            2. Domain: reject roles in an unrelated function (e.g. pure sales or HR for an engineer).\n\
            3. Score 0-100: 100 perfect title and skills, 80 good title and some skills, 0-50 weak.\n\
            4. is_match is true only if score > {} and seniority fits.\n\n\
            Return JSON: {{\"is_match\": bool, \"score\": int, \"reason\": \"str\"}}",
            ai::truncate_chars(&profile.summary, 500),
            profile.skills.iter().take(10).cloned().collect::<Vec<_>>().join(", "),
            profile.seniority.label(),
            lead.title,
            lead.company,
            lead.query_source,
            ai::truncate_chars(&lead.snippet, 1_000),
            self.policy.threshold
        );

        match ai::extract_json::<MatchAnalysis>(self.provider, &prompt, 512).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("Scoring failed for {}: {}", lead.url, e);
                MatchAnalysis::rejected(format!("Error: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use regex::Regex;

    fn lead(n: usize, title: &str) -> RawLead {
        RawLead {
            title: title.to_string(),
            company: "Acme".to_string(),
            url: format!("https://jobs.lever.co/acme/{}", n),
            snippet: format!("lead-{}", n),
            query_source: "q".to_string(),
        }
    }

    /// Replies with a score derived from the lead number in the snippet.
    fn score_by_number(score: impl Fn(usize) -> (bool, i64) + Send + Sync + 'static) -> ScriptedProvider {
        let re = Regex::new(r"lead-(\d+)").unwrap();
        ScriptedProvider::new(move |prompt| {
            let n: usize = re.captures(prompt).unwrap()[1].parse().unwrap();
            let (is_match, s) = score(n);
            Ok(format!(r#"{{"is_match": {}, "score": {}, "reason": "lead {}"}}"#, is_match, s, n))
        })
    }

    #[tokio::test]
    async fn test_top_ten_of_fifty_with_stable_ties() {
        // Scores cycle 61..=95; every third lead is not a match
        let provider = score_by_number(|n| (n % 3 != 0, 61 + (n % 35) as i64));
        let policy = ScoringPolicy::default();
        let leads: Vec<RawLead> = (0..50).map(|n| lead(n, "Backend Engineer")).collect();

        let scored = RelevanceScorer::new(&provider, &policy, 5)
            .score(leads.clone(), &CandidateProfile::default(), 10)
            .await;

        let mut expected: Vec<(usize, i64)> = (0..50usize)
            .filter(|n| n % 3 != 0)
            .map(|n| (n, 61 + (n % 35) as i64))
            .collect();
        expected.sort_by(|a, b| b.1.cmp(&a.1));
        expected.truncate(10);

        let got: Vec<(String, u8)> = scored.iter().map(|s| (s.lead.url.clone(), s.score)).collect();
        let want: Vec<(String, u8)> = expected
            .iter()
            .map(|(n, s)| (leads[*n].url.clone(), *s as u8))
            .collect();
        assert_eq!(got, want);
        assert_eq!(provider.call_count(), 50);
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive_and_errors_reject() {
        let provider = score_by_number(|n| match n {
            0 => (true, 60),
            1 => (true, 61),
            _ => (false, 99),
        });
        let policy = ScoringPolicy::default();
        let leads = vec![lead(0, "Engineer"), lead(1, "Engineer"), lead(2, "Engineer")];
        let scored = RelevanceScorer::new(&provider, &policy, 5)
            .score(leads, &CandidateProfile::default(), 10)
            .await;
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].score, 61);

        let failing = ScriptedProvider::failing();
        let scored = RelevanceScorer::new(&failing, &policy, 5)
            .score(vec![lead(0, "Engineer")], &CandidateProfile::default(), 10)
            .await;
        assert!(scored.is_empty());
    }

    #[tokio::test]
    async fn test_seniority_mismatch_is_rejected_for_junior_candidates() {
        let provider = score_by_number(|_| (true, 90));
        let policy = ScoringPolicy::default();
        let junior = CandidateProfile {
            seniority: Seniority::Junior,
            ..Default::default()
        };
        let leads = vec![lead(0, "Senior Backend Engineer"), lead(1, "Backend Engineer")];

        let scored = RelevanceScorer::new(&provider, &policy, 2)
            .score(leads.clone(), &junior, 10)
            .await;
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].lead.title, "Backend Engineer");

        let lenient = ScoringPolicy {
            reject_seniority_mismatch: false,
            ..ScoringPolicy::default()
        };
        let scored = RelevanceScorer::new(&provider, &lenient, 2).score(leads, &junior, 10).await;
        assert_eq!(scored.len(), 2);
    }
}
