//! 结果表与汇总
//!
//! 每个DUT输出一组命名直方图表（一维/二维，含边界、计数、可选数值与掩码、拟合元数据）
//! 以及标量汇总；运行汇总按DUT索引排列。

use super::efficiency::EfficiencyResult;
use super::purity::PurityResult;
use super::residuals::{FamilyResult, ResidualFamily, ResidualResult};
use super::track_angle::TrackAngleResult;
use crate::error::{AnalysisError, ErrorCategory};
use crate::fit::{BinomialEstimate, FitOutcome, GaussCoefficients, LineCoefficients};
use crate::histogram::{BinEdges, BinnedMean1D, Histogram1D, Histogram2D, MaskedMap, PeakSource};
use serde::{Deserialize, Serialize};

/// 拟合元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMetadata {
    Gauss(FitOutcome<GaussCoefficients>),
    Line(FitOutcome<LineCoefficients>),
}

/// 命名直方图表
///
/// 二维表的 `counts`/`values`/`mask` 按 `[ix * ny + iy]` 行优先排列。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramTable {
    pub name: String,
    /// 每个维度一组边界
    pub edges: Vec<BinEdges>,
    pub counts: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,
    /// true = 无效bin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Vec<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitMetadata>,
}

impl HistogramTable {
    pub fn from_1d(name: impl Into<String>, hist: &Histogram1D) -> Self {
        Self {
            name: name.into(),
            edges: vec![hist.edges().clone()],
            counts: hist.counts().to_vec(),
            values: None,
            mask: None,
            fit: None,
        }
    }

    pub fn from_2d(name: impl Into<String>, hist: &Histogram2D) -> Self {
        Self {
            name: name.into(),
            edges: vec![hist.x_edges().clone(), hist.y_edges().clone()],
            counts: hist.counts().to_vec(),
            values: None,
            mask: None,
            fit: None,
        }
    }

    /// 均值剖面：空bin被掩码
    pub fn from_profile(name: impl Into<String>, profile: &BinnedMean1D) -> Self {
        Self {
            name: name.into(),
            edges: vec![profile.edges().clone()],
            counts: profile.counts().to_vec(),
            values: Some(profile.means().to_vec()),
            mask: Some(profile.counts().iter().map(|&n| n == 0).collect()),
            fit: None,
        }
    }

    /// 掩码图，计数取分母直方图
    pub fn from_masked(name: impl Into<String>, denominator: &Histogram2D, map: &MaskedMap) -> Self {
        Self {
            values: Some(map.values.clone()),
            mask: Some(map.mask.clone()),
            ..Self::from_2d(name, denominator)
        }
    }

    pub fn with_fit(mut self, fit: FitMetadata) -> Self {
        self.fit = Some(fit);
        self
    }
}

/// 单个残差族的标量结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualFamilySummary {
    pub family: ResidualFamily,
    pub peak_source: PeakSource,
    pub entries: u64,
    pub fit: FitOutcome<GaussCoefficients>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualSummary {
    pub n_selected: u64,
    pub families: Vec<ResidualFamilySummary>,
}

/// 比例结果（效率/纯度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioSummary {
    pub pass: u64,
    pub total: u64,
    pub estimate: Option<BinomialEstimate>,
}

/// 角度发散度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleSummary {
    pub reference: String,
    pub n_tracks: u64,
    pub total: FitOutcome<GaussCoefficients>,
    pub alpha: FitOutcome<GaussCoefficients>,
    pub beta: FitOutcome<GaussCoefficients>,
}

impl AngleSummary {
    pub fn from_result(result: &TrackAngleResult) -> Self {
        let fit = |kind: &str| {
            result
                .angles
                .iter()
                .find(|a| a.kind == kind)
                .map(|a| a.fit.clone())
                .unwrap_or_else(|| FitOutcome::failed("无角度直方图"))
        };
        Self {
            reference: result.reference.label(),
            n_tracks: result.n_tracks,
            total: fit("total"),
            alpha: fit("alpha"),
            beta: fit("beta"),
        }
    }

    pub fn sigma(outcome: &FitOutcome<GaussCoefficients>) -> Option<f64> {
        outcome.coefficients().map(|c| c.sigma.abs())
    }
}

/// 单个DUT的完整报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutReport {
    pub dut_index: usize,
    pub dut_name: String,
    /// "alignment" 或 "prealignment"
    pub alignment_model: String,
    pub rows_read: u64,
    pub residuals: ResidualSummary,
    pub efficiency: RatioSummary,
    pub purity: RatioSummary,
    pub track_angle: AngleSummary,
    pub histograms: Vec<HistogramTable>,
    pub warnings: Vec<String>,
}

impl DutReport {
    pub fn histogram(&self, name: &str) -> Option<&HistogramTable> {
        self.histograms.iter().find(|h| h.name == name)
    }

    pub fn residual_sigma(&self, family: ResidualFamily) -> Option<f64> {
        self.residuals
            .families
            .iter()
            .find(|f| f.family == family)?
            .fit
            .coefficients()
            .map(|c| c.sigma.abs())
    }
}

fn position_labels(family: ResidualFamily) -> [&'static str; 2] {
    if family.is_local() {
        if family.axis() == 0 { ["column", "row"] } else { ["row", "column"] }
    } else if family.axis() == 0 {
        ["x", "y"]
    } else {
        ["y", "x"]
    }
}

fn residual_tables(family: &FamilyResult, tables: &mut Vec<HistogramTable>) {
    let name = family.family.name();
    tables.push(
        HistogramTable::from_1d(format!("residual_{name}"), &family.distribution)
            .with_fit(FitMetadata::Gauss(family.fit.clone())),
    );
    for (kind, position) in position_labels(family.family).iter().enumerate() {
        tables.push(HistogramTable::from_2d(
            format!("residual_{name}_vs_{position}"),
            &family.correlations[kind],
        ));
        tables.push(
            HistogramTable::from_profile(
                format!("mean_residual_{name}_vs_{position}"),
                &family.profiles[kind],
            )
            .with_fit(FitMetadata::Line(family.profile_fits[kind].clone())),
        );
    }
}

/// 汇总各分析器的结果
pub(crate) struct ReportParts {
    pub dut_index: usize,
    pub dut_name: String,
    pub alignment_model: String,
    pub rows_read: u64,
    pub residuals: ResidualResult,
    pub efficiency: EfficiencyResult,
    pub purity: PurityResult,
    pub track_angle: TrackAngleResult,
}

impl From<ReportParts> for DutReport {
    fn from(parts: ReportParts) -> Self {
        let mut histograms = Vec::new();
        for family in &parts.residuals.families {
            residual_tables(family, &mut histograms);
        }

        let eff = &parts.efficiency;
        histograms.push(HistogramTable::from_2d("total_track_density", &eff.total_track_density));
        histograms.push(HistogramTable::from_2d(
            "matched_track_density",
            &eff.matched_track_density,
        ));
        histograms.push(HistogramTable::from_masked(
            "efficiency",
            &eff.total_track_density,
            &eff.efficiency,
        ));
        histograms.push(HistogramTable {
            counts: eff.distance.counts().to_vec(),
            ..HistogramTable::from_masked(
                "mean_hit_track_distance",
                &eff.matched_track_density,
                &eff.distance_map,
            )
        });
        for (name, map) in [
            ("min_hit_track_distance", &eff.min_distance_map),
            ("max_hit_track_distance", &eff.max_distance_map),
        ] {
            histograms.push(HistogramTable {
                counts: eff.distance_extrema.counts().to_vec(),
                ..HistogramTable::from_masked(name, &eff.matched_track_density, map)
            });
        }

        let pur = &parts.purity;
        histograms.push(HistogramTable::from_2d("total_hit_density", &pur.total_hit_density));
        histograms.push(HistogramTable::from_2d("pure_hit_density", &pur.pure_hit_density));
        histograms.push(HistogramTable::from_masked("purity", &pur.total_hit_density, &pur.purity));

        let label = parts.track_angle.reference.label();
        for angle in &parts.track_angle.angles {
            histograms.push(
                HistogramTable::from_1d(format!("track_angle_{}_{label}", angle.kind), &angle.histogram)
                    .with_fit(FitMetadata::Gauss(angle.fit.clone())),
            );
        }

        let mut warnings = parts.residuals.warnings.clone();
        warnings.extend(eff.warnings.iter().cloned());
        warnings.extend(pur.warnings.iter().cloned());
        warnings.extend(parts.track_angle.warnings.iter().cloned());

        let residuals = ResidualSummary {
            n_selected: parts.residuals.n_selected,
            families: parts
                .residuals
                .families
                .iter()
                .map(|f| ResidualFamilySummary {
                    family: f.family,
                    peak_source: f.peak_source,
                    entries: f.distribution.total(),
                    fit: f.fit.clone(),
                })
                .collect(),
        };

        DutReport {
            dut_index: parts.dut_index,
            dut_name: parts.dut_name,
            alignment_model: parts.alignment_model,
            rows_read: parts.rows_read,
            residuals,
            efficiency: RatioSummary {
                pass: eff.n_pass,
                total: eff.n_total,
                estimate: eff.estimate,
            },
            purity: RatioSummary {
                pass: pur.n_pure,
                total: pur.n_total,
                estimate: pur.estimate,
            },
            track_angle: AngleSummary::from_result(&parts.track_angle),
            histograms,
            warnings,
        }
    }
}

/// 失败DUT记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDut {
    pub dut_index: usize,
    pub dut_name: String,
    pub category: String,
    pub message: String,
}

/// 运行汇总：所有列表按DUT索引排列，失败的DUT对应项为None
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub generated_at: String,
    pub alignment_model: String,
    pub dut_names: Vec<String>,
    pub residual_sigma_x: Vec<Option<f64>>,
    pub residual_sigma_y: Vec<Option<f64>>,
    pub residual_sigma_column: Vec<Option<f64>>,
    pub residual_sigma_row: Vec<Option<f64>>,
    pub efficiency: Vec<Option<BinomialEstimate>>,
    pub purity: Vec<Option<BinomialEstimate>>,
    pub track_angle_alpha_sigma: Vec<Option<f64>>,
    pub track_angle_beta_sigma: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telescope_angle: Option<AngleSummary>,
    pub warnings: Vec<Vec<String>>,
    pub failed: Vec<FailedDut>,
}

impl RunSummary {
    pub fn new(
        generated_at: String,
        alignment_model: &str,
        dut_names: &[String],
        outcomes: &[Result<DutReport, AnalysisError>],
        telescope_angle: Option<AngleSummary>,
    ) -> Self {
        let reports: Vec<Option<&DutReport>> = outcomes.iter().map(|o| o.as_ref().ok()).collect();
        let sigma = |family: ResidualFamily| -> Vec<Option<f64>> {
            reports
                .iter()
                .map(|r| r.and_then(|r| r.residual_sigma(family)))
                .collect()
        };
        let failed = outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().err().map(|e| (i, e)))
            .map(|(i, e)| FailedDut {
                dut_index: i,
                dut_name: dut_names.get(i).cloned().unwrap_or_default(),
                category: ErrorCategory::from_analysis_error(e).display_name().to_string(),
                message: e.to_string(),
            })
            .collect();

        Self {
            generated_at,
            alignment_model: alignment_model.to_string(),
            dut_names: dut_names.to_vec(),
            residual_sigma_x: sigma(ResidualFamily::GlobalX),
            residual_sigma_y: sigma(ResidualFamily::GlobalY),
            residual_sigma_column: sigma(ResidualFamily::Column),
            residual_sigma_row: sigma(ResidualFamily::Row),
            efficiency: reports
                .iter()
                .map(|r| r.and_then(|r| r.efficiency.estimate))
                .collect(),
            purity: reports
                .iter()
                .map(|r| r.and_then(|r| r.purity.estimate))
                .collect(),
            track_angle_alpha_sigma: reports
                .iter()
                .map(|r| r.and_then(|r| AngleSummary::sigma(&r.track_angle.alpha)))
                .collect(),
            track_angle_beta_sigma: reports
                .iter()
                .map(|r| r.and_then(|r| AngleSummary::sigma(&r.track_angle.beta)))
                .collect(),
            telescope_angle,
            warnings: reports
                .iter()
                .map(|r| r.map(|r| r.warnings.clone()).unwrap_or_default())
                .collect(),
            failed,
        }
    }

    pub fn n_failed(&self) -> usize {
        self.failed.len()
    }
}
