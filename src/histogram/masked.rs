//! 带掩码的比例图（效率、纯度）

use super::accumulator::Histogram2D;
use crate::error::{AnalysisError, AnalysisResult};

/// 带掩码的二维数值图，`mask[i] == true` 表示该bin无效
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedMap {
    pub values: Vec<f64>,
    pub mask: Vec<bool>,
}

impl MaskedMap {
    /// 百分比图：100 × pass/total
    ///
    /// total为0或低于 `minimum_density` 的bin被掩码，其值置0。
    pub fn percentage(
        pass: &Histogram2D,
        total: &Histogram2D,
        minimum_density: u64,
    ) -> AnalysisResult<Self> {
        if pass.x_edges() != total.x_edges() || pass.y_edges() != total.y_edges() {
            return Err(AnalysisError::BinningMismatch(
                "分子与分母直方图边界不一致".to_string(),
            ));
        }
        let (values, mask) = pass
            .counts()
            .iter()
            .zip(total.counts())
            .map(|(&k, &n)| {
                if n == 0 || n < minimum_density {
                    (0.0, true)
                } else {
                    (100.0 * k as f64 / n as f64, false)
                }
            })
            .unzip();
        Ok(Self { values, mask })
    }

    /// 由逐bin数值（均值、极值）与计数构造，计数为0或低于阈值的bin被掩码
    pub fn from_values(values: &[f64], counts: &[u64], minimum_count: u64) -> Self {
        let (values, mask) = values
            .iter()
            .zip(counts)
            .map(|(&m, &n)| {
                if n == 0 || n < minimum_count {
                    (0.0, true)
                } else {
                    (m, false)
                }
            })
            .unzip();
        Self { values, mask }
    }

    /// 全部bin被掩码
    pub fn all_masked(&self) -> bool {
        self.mask.iter().all(|&m| m)
    }

    /// 未掩码bin的数值全部为0（或无未掩码bin）
    pub fn all_zero(&self) -> bool {
        self.unmasked().all(|v| v == 0.0)
    }

    /// 未掩码bin的数值
    pub fn unmasked(&self) -> impl Iterator<Item = f64> + '_ {
        self.values
            .iter()
            .zip(&self.mask)
            .filter(|(_, m)| !**m)
            .map(|(v, _)| *v)
    }

    /// 未掩码bin的算术平均（仅作参考；全局效率使用非分bin的总数计算）
    pub fn unmasked_mean(&self) -> Option<f64> {
        let (sum, n) = self.unmasked().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        (n > 0).then(|| sum / n as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::BinEdges;

    fn grid() -> Histogram2D {
        let e = BinEdges::uniform(0.0, 2.0, 2).unwrap();
        Histogram2D::new(e.clone(), e)
    }

    #[test]
    fn test_percentage_masks_low_density() {
        let mut total = grid();
        let mut pass = grid();
        // bin(0,0): 4条轨迹，3条匹配；bin(1,1): 1条轨迹；其余为空
        total.fill(&[0.5, 0.5, 0.5, 0.5, 1.5], &[0.5, 0.5, 0.5, 0.5, 1.5]);
        pass.fill(&[0.5, 0.5, 0.5, 1.5], &[0.5, 0.5, 0.5, 1.5]);

        let map = MaskedMap::percentage(&pass, &total, 2).unwrap();
        assert_eq!(map.values[0], 75.0);
        assert!(!map.mask[0]);
        assert!(map.mask[1] && map.mask[2]);
        assert!(map.mask[3]); // 1 < 2
        assert_eq!(map.unmasked_mean(), Some(75.0));
    }

    #[test]
    fn test_infinite_empty_bins_are_masked_to_zero() {
        let map = MaskedMap::from_values(&[f64::INFINITY, 3.5], &[0, 4], 1);
        assert_eq!(map.values, vec![0.0, 3.5]);
        assert_eq!(map.mask, vec![true, false]);
    }

    #[test]
    fn test_empty_is_all_masked() {
        let map = MaskedMap::percentage(&grid(), &grid(), 1).unwrap();
        assert!(map.all_masked());
        assert!(map.all_zero());
        assert_eq!(map.unmasked_mean(), None);
    }
}
