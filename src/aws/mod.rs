//! AWS access: SigV4 signing, the three wire protocols and one client per
//! consumed service.

mod athena;
mod client;
mod cloudtrail;
mod iam;
mod logs;
mod signer;
mod sns;
mod xml;

pub use athena::AthenaClient;
pub use client::AwsClient;
pub use cloudtrail::{decode_event, CloudTrailClient};
pub use iam::IamClient;
pub use logs::CloudWatchLogsClient;
pub use signer::{AwsCredentials, SigV4Signer, SignedHeaders};
pub use sns::SnsAlertChannel;
