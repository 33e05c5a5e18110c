use serde::{Deserialize, Serialize};

use orderflow_auth::{Actor, EmpNo, Role};

/// Who did something, as recorded on events (permissions are not kept).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorStamp {
    pub emp_no: EmpNo,
    pub role: Role,
}

impl From<&Actor> for ActorStamp {
    fn from(actor: &Actor) -> Self {
        Self {
            emp_no: actor.emp_no.clone(),
            role: actor.role.clone(),
        }
    }
}
