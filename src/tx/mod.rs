//! Transaction construction, signing and broadcast

mod hardware;
mod intent;
mod params;
mod sender;
mod signer;

pub use hardware::{
    derivation_path, DevicePayload, DeviceResponse, DeviceSession, DeviceSignRequest,
    HardwareSigner, LEDGER_LEGACY_PATH, LEDGER_LIVE_PATH, TREZOR_PATH,
};
pub use intent::{parse_quantity, parse_u64, IntentTemplate, TransactionIntent};
pub use params::{hexify, normalize, to_hex, NormalizedParams, ReplayProtection, UnsignedTransaction};
pub use sender::{classify_submission_error, Broadcaster, ConfirmationCallback, SubmissionError};
pub use signer::{
    prepare_replay_protection, sign_transaction, LocalKeySigner, NetworkKind, RenderedSignedTx,
    SignedTransaction, SignerKind, SigningContext, TransactionSigner,
};
