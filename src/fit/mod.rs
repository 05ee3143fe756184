//! 曲线拟合与比例估计

pub mod binomial;
pub mod gauss;
pub mod linear;
pub mod outcome;

pub use binomial::{BinomialEstimate, binomial_estimate, clopper_pearson};
pub use gauss::{GaussCoefficients, fit_gaussian, fit_histogram};
pub use linear::{LineCoefficients, fit_line};
pub use outcome::FitOutcome;
