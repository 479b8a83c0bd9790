//! Per-language image recipes.
//!
//! Every recipe installs the declared dependencies at build time, copies the
//! submitted source and runs it as an unprivileged user. Nothing is mounted
//! from the host.

use serde::{Deserialize, Serialize};

use code_runner_core::types::Language;

/// Base images used for each language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeSet {
    pub python_image: String,
    pub javascript_image: String,
}

impl Default for RecipeSet {
    fn default() -> Self {
        Self {
            python_image: "python:3.11-slim".to_string(),
            javascript_image: "node:20-slim".to_string(),
        }
    }
}

impl RecipeSet {
    /// Render the Dockerfile for a language.
    pub fn dockerfile(&self, language: Language) -> String {
        match language {
            Language::Python => format!(
                "FROM {base}\n\
                 ENV PYTHONDONTWRITEBYTECODE=1 PYTHONUNBUFFERED=1 PIP_DISABLE_PIP_VERSION_CHECK=1\n\
                 WORKDIR /app\n\
                 COPY {manifest} .\n\
                 RUN pip install --no-cache-dir -r {manifest}\n\
                 COPY {source} .\n\
                 USER nobody\n\
                 CMD [\"python\", \"{source}\"]\n",
                base = self.python_image,
                manifest = language.manifest_file(),
                source = language.source_file(),
            ),
            Language::JavaScript => format!(
                "FROM {base}\n\
                 ENV NODE_ENV=production\n\
                 WORKDIR /app\n\
                 COPY {manifest} .\n\
                 RUN npm install --omit=dev --no-audit --no-fund\n\
                 COPY {source} .\n\
                 USER node\n\
                 CMD [\"node\", \"{source}\"]\n",
                base = self.javascript_image,
                manifest = language.manifest_file(),
                source = language.source_file(),
            ),
        }
    }
}
