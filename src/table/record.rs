//! 轨迹表行结构
//!
//! 每行对应一个(事件, 候选轨迹)；同一事件的行在表中连续。
//! 缺失或虚拟击中以NaN表示（JSON中为 `null` 或缺省）。

use nalgebra::Vector3;
use serde::{Deserialize, Deserializer, Serialize};

fn nan() -> f64 {
    f64::NAN
}

/// `null` → NaN
fn nan_if_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// 单个DUT上的击中（全局坐标）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DutHit {
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub x: f64,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub y: f64,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge: Option<f64>,
    /// 团簇大小
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_hits: Option<u32>,
}

impl DutHit {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            charge: None,
            n_hits: None,
        }
    }

    /// 缺失击中
    pub fn missing() -> Self {
        Self::new(f64::NAN, f64::NAN, f64::NAN)
    }

    pub fn with_cluster_size(mut self, n_hits: u32) -> Self {
        self.n_hits = Some(n_hits);
        self
    }

    /// 三个坐标均为有限值时返回位置
    #[inline]
    pub fn position(&self) -> Option<Vector3<f64>> {
        (self.x.is_finite() && self.y.is_finite() && self.z.is_finite())
            .then(|| Vector3::new(self.x, self.y, self.z))
    }
}

/// 轨迹表的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub event_number: i64,
    pub offset: [f64; 3],
    pub slope: [f64; 3],
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub track_chi2: f64,
    /// `hits[i]` 为DUT i 的击中
    #[serde(default)]
    pub hits: Vec<DutHit>,
}

impl TrackRecord {
    #[inline]
    pub fn offset(&self) -> Vector3<f64> {
        Vector3::from(self.offset)
    }

    #[inline]
    pub fn slope(&self) -> Vector3<f64> {
        Vector3::from(self.slope)
    }

    /// 指定DUT的击中（越界视为缺失）
    #[inline]
    pub fn hit(&self, dut: usize) -> Option<&DutHit> {
        self.hits.get(dut)
    }

    /// 指定DUT的有效击中位置
    #[inline]
    pub fn hit_position(&self, dut: usize) -> Option<Vector3<f64>> {
        self.hit(dut).and_then(DutHit::position)
    }

    /// 轨迹参数有效（χ²、偏移与斜率均为有限值）
    pub fn has_valid_track(&self) -> bool {
        self.track_chi2.is_finite()
            && self.offset.iter().all(|v| v.is_finite())
            && self.slope.iter().all(|v| v.is_finite())
    }

    /// χ²截断（无截断时总是通过）
    #[inline]
    pub fn passes_chi2(&self, max_chi2: Option<f64>) -> bool {
        max_chi2.is_none_or(|cut| self.track_chi2 <= cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_coordinates_become_nan() {
        let row: TrackRecord = serde_json::from_str(
            r#"{"event_number": 4, "offset": [0, 0, 0], "slope": [0, 0, 1],
                "track_chi2": null,
                "hits": [{"x": 1.0, "y": 2.0, "z": 0.0, "n_hits": 3}, {"x": null}]}"#,
        )
        .unwrap();

        assert!(row.track_chi2.is_nan());
        assert!(!row.has_valid_track());
        assert_eq!(row.hit(0).unwrap().n_hits, Some(3));
        assert!(row.hit_position(0).is_some());
        assert!(row.hit_position(1).is_none());
        assert!(row.hit_position(7).is_none());
    }

    #[test]
    fn test_nan_serializes_as_null() {
        let row = TrackRecord {
            event_number: 1,
            offset: [0.0; 3],
            slope: [0.0, 0.0, 1.0],
            track_chi2: 2.0,
            hits: vec![DutHit::missing()],
        };
        let json = serde_json::to_string(&row).unwrap();
        let back: TrackRecord = serde_json::from_str(&json).unwrap();
        assert!(back.hits[0].x.is_nan());
        assert_eq!(back.track_chi2, 2.0);
    }

    #[test]
    fn test_chi2_cut() {
        let row = TrackRecord {
            event_number: 1,
            offset: [0.0; 3],
            slope: [0.0, 0.0, 1.0],
            track_chi2: 5.0,
            hits: vec![],
        };
        assert!(row.passes_chi2(None));
        assert!(row.passes_chi2(Some(5.0)));
        assert!(!row.passes_chi2(Some(4.9)));
    }
}
