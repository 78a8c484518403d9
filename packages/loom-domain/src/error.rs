#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid state transition: {from} -> {to}.")]
	InvalidTransition { from: &'static str, to: &'static str },
	#[error("Unknown state: {0}.")]
	UnknownState(String),
}
