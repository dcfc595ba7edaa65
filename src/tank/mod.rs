//! Gas tank funding: relay client and balance coordinator

mod client;
mod funding;

pub use client::{FundingErrorPayload, FundingRelay, FundingResponse, TankClient};
pub use funding::{FundingCoordinator, FundingPrompt, FundingRequest, FundingState};
