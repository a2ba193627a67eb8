//! Project relevance scoring for the project-analysis job: scores a user's
//! portfolio projects against a job posting and recommends which resume
//! projects to swap out.

use serde::{Deserialize, Serialize};

/// A portfolio project as stored by the external project database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub detailed_bullets: Vec<String>,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub is_on_resume: bool,
}

impl ProjectRecord {
    fn searchable_text(&self) -> String {
        let mut text = format!("{} {}", self.name, self.description);
        for part in self
            .technologies
            .iter()
            .chain(self.features.iter())
            .chain(self.detailed_bullets.iter())
        {
            text.push(' ');
            text.push_str(part);
        }
        text.to_lowercase()
    }
}

/// Component and overall scores, all 0-100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceScores {
    pub overall_score: f64,
    pub keyword_overlap: f64,
    pub technology_match: f64,
    pub domain_relevance: f64,
    pub recency: f64,
    pub complexity: f64,
}

/// A recommended resume swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRecommendation {
    pub remove_id: i64,
    pub remove_name: String,
    pub remove_score: f64,
    pub add_id: i64,
    pub add_name: String,
    pub add_score: f64,
    pub score_delta: f64,
    pub reason: String,
}

const WEIGHT_KEYWORDS: f64 = 0.40;
const WEIGHT_TECHNOLOGY: f64 = 0.25;
const WEIGHT_DOMAIN: f64 = 0.15;
const WEIGHT_RECENCY: f64 = 0.10;
const WEIGHT_COMPLEXITY: f64 = 0.10;

/// Minimum score improvement before a swap is worth recommending.
pub const MIN_SWAP_IMPROVEMENT: f64 = 15.0;

fn domain_keywords(job_domain: &str) -> Vec<&'static str> {
    let table: [(&str, &[&str]); 6] = [
        (
            "web development",
            &["web", "frontend", "backend", "fullstack", "api", "rest", "http", "server", "client"],
        ),
        (
            "machine learning",
            &["ml", "ai", "model", "neural", "deep learning", "nlp", "computer vision", "tensorflow", "pytorch"],
        ),
        ("mobile", &["mobile", "ios", "android", "react native", "flutter", "app"]),
        (
            "data",
            &["data", "analytics", "pipeline", "etl", "database", "sql", "big data", "warehouse"],
        ),
        (
            "devops",
            &["devops", "ci/cd", "docker", "kubernetes", "aws", "cloud", "infrastructure"],
        ),
        (
            "security",
            &["security", "authentication", "encryption", "penetration", "vulnerability"],
        ),
    ];
    let domain_lower = job_domain.to_lowercase();
    let mut out = Vec::new();
    for (domain, keywords) in table {
        if domain_lower.contains(domain) {
            out.extend_from_slice(keywords);
        }
    }
    out
}

/// Fraction-of-keywords coverage, boosted 1.5x and capped at 100. Multi-word
/// keywords earn half credit when any significant word matches.
pub fn keyword_overlap(project: &ProjectRecord, job_keywords: &[String]) -> f64 {
    if job_keywords.is_empty() {
        return 0.0;
    }
    let text = project.searchable_text();
    let mut matches = 0.0;
    for keyword in job_keywords {
        let kw = keyword.to_lowercase();
        if text.contains(&kw) {
            matches += 1.0;
        } else if kw.split_whitespace().count() > 1
            && kw.split_whitespace().any(|w| w.len() > 3 && text.contains(w))
        {
            matches += 0.5;
        }
    }
    (matches / job_keywords.len() as f64 * 100.0 * 1.5).min(100.0)
}

/// Fraction of required technologies present. Neutral 50 with no
/// requirements.
pub fn technology_match(project: &ProjectRecord, required: &[String]) -> f64 {
    if required.is_empty() {
        return 50.0;
    }
    let techs: Vec<String> = project.technologies.iter().map(|t| t.to_lowercase()).collect();
    let matches = required
        .iter()
        .filter(|req| {
            let req = req.to_lowercase();
            techs.iter().any(|t| t.contains(&req))
        })
        .count();
    matches as f64 / required.len() as f64 * 100.0
}

/// Domain keyword density, boosted 2x and capped. Neutral 50 when the domain
/// is unrecognized.
pub fn domain_relevance(project: &ProjectRecord, job_domain: &str) -> f64 {
    let keywords = domain_keywords(job_domain);
    if keywords.is_empty() {
        return 50.0;
    }
    let text = project.searchable_text();
    let matches = keywords.iter().filter(|kw| text.contains(**kw)).count();
    (matches as f64 / keywords.len() as f64 * 200.0).min(100.0)
}

/// Recency bonus: 100 for this year, minus 15 per year of age. Unknown end
/// dates read as neutral 50.
pub fn recency(project: &ProjectRecord, today: chrono::NaiveDate) -> f64 {
    let year: Option<i32> = project
        .end_date
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| s.len() == 4)
        .filter_map(|s| s.parse().ok())
        .next();
    match year {
        Some(year) => {
            use chrono::Datelike;
            let years_ago = (today.year() - year).max(0);
            (100.0 - years_ago as f64 * 15.0).max(0.0)
        }
        None => 50.0,
    }
}

/// Structural richness: feature count, tech diversity, bullet depth, and
/// description length over a base of 50.
pub fn complexity(project: &ProjectRecord) -> f64 {
    let mut score = 50.0;
    score += (project.features.len() as f64 * 3.0).min(15.0);
    score += (project.technologies.len() as f64 * 2.0).min(10.0);
    score += (project.detailed_bullets.len() as f64 * 3.0).min(15.0);
    if project.description.len() > 200 {
        score += 10.0;
    } else if project.description.len() > 100 {
        score += 5.0;
    }
    score.min(100.0)
}

/// Weighted overall score with component breakdown.
pub fn score_project(
    project: &ProjectRecord,
    job_keywords: &[String],
    required_technologies: &[String],
    job_domain: Option<&str>,
    today: chrono::NaiveDate,
) -> RelevanceScores {
    let keyword_score = keyword_overlap(project, job_keywords);
    let tech_score = technology_match(project, required_technologies);
    let domain_score = domain_relevance(project, job_domain.unwrap_or("general"));
    let recency_score = recency(project, today);
    let complexity_score = complexity(project);
    RelevanceScores {
        overall_score: keyword_score * WEIGHT_KEYWORDS
            + tech_score * WEIGHT_TECHNOLOGY
            + domain_score * WEIGHT_DOMAIN
            + recency_score * WEIGHT_RECENCY
            + complexity_score * WEIGHT_COMPLEXITY,
        keyword_overlap: keyword_score,
        technology_match: tech_score,
        domain_relevance: domain_score,
        recency: recency_score,
        complexity: complexity_score,
    }
}

/// All projects scored and sorted by descending relevance.
pub fn rank_projects(
    projects: &[ProjectRecord],
    job_keywords: &[String],
    required_technologies: &[String],
    job_domain: Option<&str>,
    today: chrono::NaiveDate,
) -> Vec<(ProjectRecord, RelevanceScores)> {
    let mut scored: Vec<_> = projects
        .iter()
        .map(|p| {
            let scores = score_project(p, job_keywords, required_technologies, job_domain, today);
            (p.clone(), scores)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.overall_score
            .partial_cmp(&a.1.overall_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}

/// Pairs the weakest on-resume projects with the strongest alternatives and
/// recommends swaps that clear the improvement threshold. Each alternative
/// is recommended at most once.
pub fn recommend_swaps(
    projects: &[ProjectRecord],
    job_keywords: &[String],
    required_technologies: &[String],
    job_domain: Option<&str>,
    today: chrono::NaiveDate,
) -> Vec<SwapRecommendation> {
    let score =
        |p: &ProjectRecord| score_project(p, job_keywords, required_technologies, job_domain, today).overall_score;

    let mut current: Vec<_> = projects
        .iter()
        .filter(|p| p.is_on_resume)
        .map(|p| (p.clone(), score(p)))
        .collect();
    let mut alternatives: Vec<_> = projects
        .iter()
        .filter(|p| !p.is_on_resume)
        .map(|p| (p.clone(), score(p)))
        .collect();

    // Weakest current first, strongest alternative first.
    current.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    alternatives.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut recommendations = Vec::new();
    let mut alt_iter = alternatives.into_iter();
    for (remove, remove_score) in current {
        let Some((add, add_score)) = alt_iter.next() else {
            break;
        };
        let delta = add_score - remove_score;
        if delta < MIN_SWAP_IMPROVEMENT {
            continue;
        }
        recommendations.push(SwapRecommendation {
            remove_id: remove.id,
            remove_name: remove.name.clone(),
            remove_score,
            add_id: add.id,
            add_name: add.name.clone(),
            add_score,
            score_delta: delta,
            reason: format!(
                "'{}' scores {:.0} points higher against this posting than '{}'",
                add.name, delta, remove.name
            ),
        });
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(name: &str, techs: &[&str], on_resume: bool) -> ProjectRecord {
        ProjectRecord {
            id: name.len() as i64,
            name: name.to_string(),
            description: format!("{} project", name),
            technologies: techs.iter().map(|s| s.to_string()).collect(),
            is_on_resume: on_resume,
            ..Default::default()
        }
    }

    fn today() -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[test]
    fn keyword_coverage_is_boosted_and_capped() {
        let p = project("search engine", &["rust"], true);
        let kws = vec!["search".to_string(), "engine".to_string()];
        assert_eq!(keyword_overlap(&p, &kws), 100.0);
        assert_eq!(keyword_overlap(&p, &[]), 0.0);
    }

    #[test]
    fn ranking_prefers_matching_technologies() {
        let projects = vec![
            project("web dashboard", &["react", "typescript"], true),
            project("ml pipeline", &["python", "pytorch"], false),
        ];
        let kws = vec!["pytorch".to_string(), "model".to_string()];
        let required = vec!["pytorch".to_string()];
        let ranked = rank_projects(&projects, &kws, &required, Some("machine learning"), today());
        assert_eq!(ranked[0].0.name, "ml pipeline");
    }

    #[test]
    fn swaps_require_the_improvement_threshold() {
        let projects = vec![
            project("old blog", &["php"], true),
            project("llm orchestrator", &["rust", "tokio"], false),
        ];
        let kws = vec!["rust".to_string(), "orchestrator".to_string(), "llm".to_string()];
        let required = vec!["rust".to_string()];
        let swaps = recommend_swaps(&projects, &kws, &required, None, today());
        assert_eq!(swaps.len(), 1);
        assert_eq!(swaps[0].remove_name, "old blog");
        assert!(swaps[0].score_delta >= MIN_SWAP_IMPROVEMENT);

        // Near-equal projects produce no recommendation.
        let projects = vec![
            project("service a", &["rust"], true),
            project("service b", &["rust"], false),
        ];
        assert!(recommend_swaps(&projects, &kws, &required, None, today()).is_empty());
    }
}
