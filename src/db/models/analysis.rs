use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetric {
    pub score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub improvement: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub argumentation: PerformanceMetric,
    pub clarity: PerformanceMetric,
    pub engagement: PerformanceMetric,
    pub critical_thinking: PerformanceMetric,
    pub communication: PerformanceMetric,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificFeedback {
    #[serde(default)]
    pub opening_statement: Vec<String>,
    #[serde(default)]
    pub argument_structure: Vec<String>,
    #[serde(default)]
    pub evidence_usage: Vec<String>,
    #[serde(default)]
    pub rebuttal_skills: Vec<String>,
    #[serde(default)]
    pub closing_argument: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub action: String,
    pub description: String,
    pub timeframe: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovementPlan {
    #[serde(default)]
    pub immediate: Vec<PlanItem>,
    #[serde(default)]
    pub short_term: Vec<PlanItem>,
    #[serde(default)]
    pub long_term: Vec<PlanItem>,
}

/// Post-debate report produced by the external analysis workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebateAnalysisData {
    pub overall_score: f64,
    pub performance_metrics: PerformanceMetrics,
    #[serde(default)]
    pub key_strengths: Vec<String>,
    #[serde(default)]
    pub areas_for_improvement: Vec<String>,
    #[serde(default)]
    pub specific_feedback: SpecificFeedback,
    #[serde(default)]
    pub improvement_plan: ImprovementPlan,
    #[serde(default)]
    pub encouragement: String,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// Cache entry: the report plus where and when it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAnalysis {
    #[serde(flatten)]
    pub analysis: DebateAnalysisData,
    pub stored_at: DateTime<Utc>,
    pub session_id: SessionId,
}

#[cfg(test)]
pub(crate) fn sample_analysis(overall_score: f64) -> DebateAnalysisData {
    let metric = |score: f64| PerformanceMetric {
        score,
        strengths: vec![String::from("Clear thesis")],
        weaknesses: vec![String::from("Thin evidence")],
        improvement: String::from("Cite one source per claim"),
    };

    DebateAnalysisData {
        overall_score,
        performance_metrics: PerformanceMetrics {
            argumentation: metric(78.0),
            clarity: metric(82.0),
            engagement: metric(70.0),
            critical_thinking: metric(74.0),
            communication: metric(80.0),
        },
        key_strengths: vec![String::from("Structured opening")],
        areas_for_improvement: vec![String::from("Rebuttal depth")],
        specific_feedback: SpecificFeedback {
            rebuttal_skills: vec![String::from("Address the strongest counterpoint first")],
            ..Default::default()
        },
        improvement_plan: ImprovementPlan {
            immediate: vec![PlanItem {
                action: String::from("Outline rebuttals"),
                description: String::from("Prepare two rebuttals before each debate"),
                timeframe: String::from("Next session"),
            }],
            ..Default::default()
        },
        encouragement: String::from("Strong progress."),
        next_steps: vec![String::from("Try a hard-difficulty topic")],
    }
}
