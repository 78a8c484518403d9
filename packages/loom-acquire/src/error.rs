#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Request failed: {0}")]
	Http(#[from] reqwest::Error),
	#[error("HTTP {status} from {url}")]
	Status { status: u16, url: String },
	#[error("robots.txt denies fetching {url}")]
	RobotsDenied { url: String },
	#[error("Invalid URL: {0}")]
	InvalidUrl(String),
	#[error("Feed {url} failed: {message}")]
	Feed { url: String, message: String },
	#[error("CSV parse failed: {0}")]
	Csv(#[from] csv::Error),
	#[error("Workbook parse failed: {0}")]
	Xlsx(String),
	#[error("Invalid input: {0}")]
	InvalidInput(String),
}
