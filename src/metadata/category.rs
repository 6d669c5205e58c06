use std::fmt;

use serde::{Deserialize, Serialize};

use crate::jobs::JobKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Generate,
    Refine,
    Upscale,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Generate, Category::Refine, Category::Upscale];

    pub fn classify(kind: JobKind, strength: f64) -> Self {
        if kind == JobKind::Upscaling {
            Category::Upscale
        } else if strength < 1.0 {
            Category::Refine
        } else {
            Category::Generate
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Generate => "Generate",
            Category::Refine => "Refine",
            Category::Upscale => "Upscale",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
