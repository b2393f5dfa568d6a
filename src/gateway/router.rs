// ============================================================================
// Action Router
// ============================================================================
//
// Maps symbolic actions to upstream endpoints.
//
// Routing table:
// - health_check               GET    /health
// - generate_embedding         POST   /api/embeddings/generate
// - semantic_search            POST   /api/search/semantic
// - vector_search              POST   /api/search/vector
// - hybrid_search              POST   /api/search/hybrid
// - chat_completion            POST   /api/chat/completions
// - extract_text               POST   /api/documents/extract     (legacy: /extract)
// - process_document           POST   /api/documents/process     (legacy: /process)
// - analyze_image              POST   /api/images/analyze
// - list_documents             GET    /api/documents
// - get_document               GET    /api/documents/{document_id}
// - delete_document            DELETE /api/documents/{document_id}
// - get_job_status             GET    /api/v1/jobs/{job_id}/status
// - create_products_from_chunks POST  /api/products/create-from-chunks
//
// The table is a match on a closed enum, so a new action cannot be added
// without giving it a route.
//
// ============================================================================

use crate::envelope::HttpMethod;
use crate::error::GatewayError;
use std::collections::HashMap;

pub const SCOPE_READ: &str = "mivaa:read";
pub const SCOPE_WRITE: &str = "mivaa:write";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    HealthCheck,
    GenerateEmbedding,
    SemanticSearch,
    VectorSearch,
    HybridSearch,
    ChatCompletion,
    ExtractText,
    ProcessDocument,
    AnalyzeImage,
    ListDocuments,
    GetDocument,
    DeleteDocument,
    GetJobStatus,
    CreateProductsFromChunks,
}

/// Upstream endpoint for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Path template; `{name}` segments are filled from request params
    pub path: &'static str,
    pub method: HttpMethod,
    pub required_scope: &'static str,
    pub workspace_required: bool,
}

const LEGACY_PATHS: &[(&str, Action)] = &[
    ("/extract", Action::ExtractText),
    ("/process", Action::ProcessDocument),
];

impl Action {
    pub const ALL: [Action; 14] = [
        Action::HealthCheck,
        Action::GenerateEmbedding,
        Action::SemanticSearch,
        Action::VectorSearch,
        Action::HybridSearch,
        Action::ChatCompletion,
        Action::ExtractText,
        Action::ProcessDocument,
        Action::AnalyzeImage,
        Action::ListDocuments,
        Action::GetDocument,
        Action::DeleteDocument,
        Action::GetJobStatus,
        Action::CreateProductsFromChunks,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Action::HealthCheck => "health_check",
            Action::GenerateEmbedding => "generate_embedding",
            Action::SemanticSearch => "semantic_search",
            Action::VectorSearch => "vector_search",
            Action::HybridSearch => "hybrid_search",
            Action::ChatCompletion => "chat_completion",
            Action::ExtractText => "extract_text",
            Action::ProcessDocument => "process_document",
            Action::AnalyzeImage => "analyze_image",
            Action::ListDocuments => "list_documents",
            Action::GetDocument => "get_document",
            Action::DeleteDocument => "delete_document",
            Action::GetJobStatus => "get_job_status",
            Action::CreateProductsFromChunks => "create_products_from_chunks",
        }
    }

    pub fn route(&self) -> Route {
        use HttpMethod::*;

        let (path, method, required_scope, workspace_required) = match self {
            Action::HealthCheck => ("/health", Get, SCOPE_READ, false),
            Action::GenerateEmbedding => ("/api/embeddings/generate", Post, SCOPE_READ, false),
            Action::SemanticSearch => ("/api/search/semantic", Post, SCOPE_READ, false),
            Action::VectorSearch => ("/api/search/vector", Post, SCOPE_READ, false),
            Action::HybridSearch => ("/api/search/hybrid", Post, SCOPE_READ, false),
            Action::ChatCompletion => ("/api/chat/completions", Post, SCOPE_READ, false),
            Action::ExtractText => ("/api/documents/extract", Post, SCOPE_WRITE, true),
            Action::ProcessDocument => ("/api/documents/process", Post, SCOPE_WRITE, true),
            Action::AnalyzeImage => ("/api/images/analyze", Post, SCOPE_WRITE, true),
            Action::ListDocuments => ("/api/documents", Get, SCOPE_READ, true),
            Action::GetDocument => ("/api/documents/{document_id}", Get, SCOPE_READ, true),
            Action::DeleteDocument => ("/api/documents/{document_id}", Delete, SCOPE_WRITE, true),
            Action::GetJobStatus => ("/api/v1/jobs/{job_id}/status", Get, SCOPE_READ, false),
            Action::CreateProductsFromChunks => {
                ("/api/products/create-from-chunks", Post, SCOPE_WRITE, true)
            }
        };

        Route {
            path,
            method,
            required_scope,
            workspace_required,
        }
    }

    /// Resolve an action name or legacy endpoint path
    pub fn resolve(name: &str) -> Option<Action> {
        let name = name.trim();
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.name() == name)
            .or_else(|| {
                LEGACY_PATHS
                    .iter()
                    .find(|(path, _)| *path == name)
                    .map(|(_, action)| *action)
            })
    }

    /// Everything `resolve` accepts, for error responses
    pub fn valid_names() -> Vec<&'static str> {
        Action::ALL
            .iter()
            .map(Action::name)
            .chain(LEGACY_PATHS.iter().map(|(path, _)| *path))
            .collect()
    }
}

impl Route {
    /// Fill `{name}` placeholders from `params`
    pub fn render_path(&self, params: &HashMap<String, String>) -> Result<String, GatewayError> {
        let mut rendered = String::with_capacity(self.path.len());

        for (i, segment) in self.path.split('/').enumerate() {
            if i > 0 {
                rendered.push('/');
            }
            match segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
            {
                Some(name) => {
                    let value = params
                        .get(name)
                        .map(|v| v.trim())
                        .filter(|v| !v.is_empty())
                        .ok_or_else(|| {
                            GatewayError::validation(format!("Missing path parameter '{}'", name))
                        })?;
                    if !is_safe_segment(value) {
                        return Err(GatewayError::validation(format!(
                            "Path parameter '{}' contains unsupported characters",
                            name
                        )));
                    }
                    rendered.push_str(value);
                }
                None => rendered.push_str(segment),
            }
        }

        Ok(rendered)
    }
}

fn is_safe_segment(value: &str) -> bool {
    value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_action_resolves_to_itself() {
        for action in Action::ALL {
            assert_eq!(Action::resolve(action.name()), Some(action));
            assert!(action.route().path.starts_with('/'));
        }
    }

    #[test]
    fn test_legacy_paths() {
        assert_eq!(Action::resolve("/extract"), Some(Action::ExtractText));
        assert_eq!(Action::resolve("/process"), Some(Action::ProcessDocument));
        assert_eq!(Action::resolve("/api/documents/extract"), None);
        assert_eq!(Action::resolve("nonexistent_action"), None);
    }

    #[test]
    fn test_valid_names_list_everything() {
        let names = Action::valid_names();
        assert_eq!(names.len(), Action::ALL.len() + LEGACY_PATHS.len());
        assert!(names.contains(&"semantic_search"));
        assert!(names.contains(&"/extract"));
    }

    #[test]
    fn test_route_table_entries() {
        let route = Action::SemanticSearch.route();
        assert_eq!(route.path, "/api/search/semantic");
        assert_eq!(route.method, HttpMethod::Post);
        assert_eq!(route.required_scope, SCOPE_READ);
        assert!(!route.workspace_required);

        let route = Action::DeleteDocument.route();
        assert_eq!(route.method, HttpMethod::Delete);
        assert_eq!(route.required_scope, SCOPE_WRITE);
        assert!(route.workspace_required);
    }

    #[test]
    fn test_render_path_params() {
        let route = Action::GetJobStatus.route();
        let mut params = HashMap::new();

        let err = route.render_path(&params).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        params.insert("job_id".to_string(), "job-123".to_string());
        assert_eq!(route.render_path(&params).unwrap(), "/api/v1/jobs/job-123/status");

        params.insert("job_id".to_string(), "../admin".to_string());
        assert!(route.render_path(&params).is_err());

        assert_eq!(
            Action::SemanticSearch.route().render_path(&HashMap::new()).unwrap(),
            "/api/search/semantic"
        );
    }
}
