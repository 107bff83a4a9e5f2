use domain::policy::entity::Policy;
use domain::policy::error::PolicyLoadError;

/// Pluggable policy back-end.
///
/// Implementations parse their source (a FortiGate config file, a policy
/// database), flatten all group references, and hand back the finished
/// policy set exactly once per run. Construction happens with the input
/// source; `provide` consumes it.
pub trait PolicyProvider {
    fn provide(&mut self) -> Result<Vec<Policy>, PolicyLoadError>;
}
