pub mod errors;
pub mod sampler;
pub mod session;
pub mod speed_test_client;

pub use errors::SpeedTestError;
pub use session::RunReport;
pub use speed_test_client::SpeedTest;
