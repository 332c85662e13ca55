use serde::{Deserialize, Serialize};

/// Where an operation runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationTarget {
    #[default]
    Local,
    Remote,
}

impl OperationTarget {
    /// Map the boolean `ssh` request flag onto a target.
    pub fn from_ssh_flag(ssh: bool) -> Self {
        if ssh {
            OperationTarget::Remote
        } else {
            OperationTarget::Local
        }
    }

    pub fn is_remote(self) -> bool {
        self == OperationTarget::Remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&OperationTarget::Remote).unwrap(), "\"remote\"");
        let target: OperationTarget = serde_json::from_str("\"local\"").unwrap();
        assert_eq!(target, OperationTarget::Local);
    }

    #[test]
    fn test_from_ssh_flag() {
        assert!(OperationTarget::from_ssh_flag(true).is_remote());
        assert_eq!(OperationTarget::from_ssh_flag(false), OperationTarget::Local);
    }
}
