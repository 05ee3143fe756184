//! 数据块投影：轨迹与DUT平面求交，击中与交点变换到局部坐标
//!
//! 流水线对每个数据块只投影一次，投影结果由残差、效率、纯度分析器共享；
//! 局部z一致性在此统一校验，失败时对该DUT致命。

use crate::error::AnalysisResult;
use crate::geometry::{DutTransform, check_local_z};
use crate::table::TrackRecord;
use nalgebra::Vector3;

/// 一行在某DUT上的投影结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedRow {
    /// 击中位置（全局），缺失为None
    pub hit_global: Option<Vector3<f64>>,
    pub hit_local: Option<Vector3<f64>>,
    /// 轨迹交点（全局），轨迹无效或平行于平面时为None
    pub intersection_global: Option<Vector3<f64>>,
    pub intersection_local: Option<Vector3<f64>>,
    pub track_chi2: f64,
    pub cluster_size: Option<u32>,
}

impl ProjectedRow {
    /// 局部平面内击中–交点距离
    pub fn local_distance(&self) -> Option<f64> {
        match (self.hit_local, self.intersection_local) {
            (Some(hit), Some(track)) => Some((hit.x - track.x).hypot(hit.y - track.y)),
            _ => None,
        }
    }
}

/// 单DUT投影器
#[derive(Debug, Clone, Copy)]
pub struct DutProjector {
    dut: usize,
    transform: DutTransform,
}

impl DutProjector {
    pub fn new(dut: usize, transform: DutTransform) -> Self {
        Self { dut, transform }
    }

    pub fn dut(&self) -> usize {
        self.dut
    }

    pub fn transform(&self) -> &DutTransform {
        &self.transform
    }

    /// 投影一个数据块
    ///
    /// 未通过χ²截断的行整行剔除；轨迹无效（NaN）的行保留击中，交点为None。
    pub fn project(
        &self,
        chunk: &[TrackRecord],
        max_chi2: Option<f64>,
    ) -> AnalysisResult<Vec<ProjectedRow>> {
        let selected: Vec<&TrackRecord> = chunk
            .iter()
            .filter(|r| !r.track_chi2.is_finite() || r.passes_chi2(max_chi2))
            .collect();

        let hits: Vec<Option<Vector3<f64>>> =
            selected.iter().map(|r| r.hit_position(self.dut)).collect();
        let intersections: Vec<Option<Vector3<f64>>> = selected
            .iter()
            .map(|r| {
                r.has_valid_track()
                    .then(|| self.transform.intersect_track(&r.offset(), &r.slope()))
                    .filter(|p| p.iter().all(|v| v.is_finite()))
            })
            .collect();

        let hits_local = self.to_local_present(&hits);
        let intersections_local = self.to_local_present(&intersections);

        let mut local_z = Vec::with_capacity(selected.len() * 2);
        let mut magnitudes = Vec::with_capacity(selected.len() * 2);
        for (global, local) in hits
            .iter()
            .zip(&hits_local)
            .chain(intersections.iter().zip(&intersections_local))
        {
            if let (Some(g), Some(l)) = (global, local) {
                local_z.push(l.z);
                magnitudes.push(g.norm());
            }
        }
        check_local_z(self.dut, &local_z, &magnitudes)?;

        let rows = selected
            .iter()
            .enumerate()
            .map(|(i, record)| ProjectedRow {
                hit_global: hits[i],
                hit_local: hits_local[i],
                intersection_global: intersections[i],
                intersection_local: intersections_local[i],
                track_chi2: record.track_chi2,
                cluster_size: record.hit(self.dut).and_then(|h| h.n_hits),
            })
            .collect();
        Ok(rows)
    }

    /// 对存在的点做批量变换，缺失位置保持None
    fn to_local_present(&self, points: &[Option<Vector3<f64>>]) -> Vec<Option<Vector3<f64>>> {
        let present: Vec<Vector3<f64>> = points.iter().flatten().copied().collect();
        let mut local = self.transform.to_local_batch(&present).into_iter();
        points
            .iter()
            .map(|p| p.and_then(|_| local.next()))
            .collect()
    }
}
