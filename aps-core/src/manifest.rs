use serde::{Deserialize, Serialize};

const VIEWABLE_OUTPUT_TYPES: [&str; 3] = ["svf2", "svf", "otg"];
const GEOMETRY_ROLES: [&str; 3] = ["3d", "2d", "graphics"];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Manifest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub derivatives: Vec<DerivativeNode>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivativeNode {
    #[serde(default)]
    pub output_type: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub children: Vec<DerivativeNode>,
}

impl Manifest {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }

    /// True when the manifest finished and at least one derivative can be
    /// opened by the viewer.
    pub fn has_viewable_derivative(&self) -> bool {
        self.is_success() && self.derivatives.iter().any(DerivativeNode::has_viewable)
    }
}

impl DerivativeNode {
    fn is_complete(&self) -> bool {
        self.status.as_deref() == Some("success") || self.progress.as_deref() == Some("complete")
    }

    fn has_viewable(&self) -> bool {
        let viewable_output = self
            .output_type
            .as_deref()
            .is_some_and(|t| VIEWABLE_OUTPUT_TYPES.contains(&t));
        let child_has_geometry = self.children.iter().any(|child| {
            child
                .role
                .as_deref()
                .is_some_and(|role| GEOMETRY_ROLES.contains(&role))
                && child.is_complete()
        });
        if viewable_output && child_has_geometry {
            return true;
        }
        self.children.iter().any(DerivativeNode::has_viewable)
    }
}
