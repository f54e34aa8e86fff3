pub mod config;
pub mod correlation;
pub mod data;
pub mod error;
pub mod parallel;
pub mod portfolio;
pub mod report;
pub mod returns;
pub mod risk;
pub mod simulation;

pub use config::{ExecutionStrategy, Settings};
pub use correlation::{CorrelationFactor, factorize};
pub use data::{PriceRow, PriceSeries};
pub use error::{InvalidInputError, NumericalError, Result, SimError};
pub use parallel::CancellationToken;
pub use portfolio::{FrontierSample, FrontierSampler, PortfolioStats, portfolio_stats, sample_frontier};
pub use returns::{ReturnMatrix, ReturnModel, estimate_returns};
pub use risk::{DEFAULT_CONFIDENCE, RiskMetrics, analyze};
pub use simulation::{PortfolioPath, PricePath, Simulation, SimulationOptions, Simulator, simulate};
