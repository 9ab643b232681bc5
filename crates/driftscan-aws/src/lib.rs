//! AWS platform provider: lists EC2 instances and S3 buckets as actual
//! resources. Listing calls are paginated and rate-limited; per-resource
//! attribute detail is fetched lazily the first time a consumer asks.

mod ec2;
mod limiter;
mod provider;
mod s3;

pub use provider::AwsPlatformProvider;
