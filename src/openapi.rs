//! Static OpenAPI 3 description of the HTTP surface, built from a route
//! table so `benos openapi` and `GET /api/openapi.json` agree.

use serde_json::{Map, Value, json};

struct Route {
    method: &'static str,
    path: &'static str,
    tag: &'static str,
    summary: &'static str,
    /// Query filters beyond `limit`/`offset`/`search`; `None` for routes
    /// that are not paginated lists.
    list_filters: Option<&'static [&'static str]>,
    body: bool,
}

const fn op(method: &'static str, path: &'static str, tag: &'static str, summary: &'static str) -> Route {
    Route {
        method,
        path,
        tag,
        summary,
        list_filters: None,
        body: false,
    }
}

const fn with_body(method: &'static str, path: &'static str, tag: &'static str, summary: &'static str) -> Route {
    Route {
        method,
        path,
        tag,
        summary,
        list_filters: None,
        body: true,
    }
}

const fn list(path: &'static str, tag: &'static str, summary: &'static str, filters: &'static [&'static str]) -> Route {
    Route {
        method: "get",
        path,
        tag,
        summary,
        list_filters: Some(filters),
        body: false,
    }
}

const ROUTES: &[Route] = &[
    op("get", "/health", "system", "Liveness check"),
    op("get", "/ws", "system", "Realtime change feed (WebSocket)"),
    op("get", "/api/openapi.json", "system", "This document"),
    // Areas
    list("/api/areas", "areas", "List areas", &[]),
    with_body("post", "/api/areas", "areas", "Create an area"),
    with_body("post", "/api/areas/reorder", "areas", "Reorder areas"),
    op("get", "/api/areas/{id}", "areas", "Get an area"),
    with_body("patch", "/api/areas/{id}", "areas", "Update an area"),
    op("delete", "/api/areas/{id}", "areas", "Delete an area"),
    // Projects
    list("/api/projects", "projects", "List projects", &["area_id", "status"]),
    with_body("post", "/api/projects", "projects", "Create a project"),
    op("get", "/api/projects/{id}", "projects", "Get a project"),
    with_body("patch", "/api/projects/{id}", "projects", "Update a project"),
    op("delete", "/api/projects/{id}", "projects", "Delete a project"),
    with_body("post", "/api/projects/{id}/milestones/reorder", "milestones", "Reorder a project's milestones"),
    // Milestones
    list("/api/milestones", "milestones", "List milestones with progress", &["project_id", "status"]),
    with_body("post", "/api/milestones", "milestones", "Create a milestone"),
    op("get", "/api/milestones/{id}", "milestones", "Get a milestone"),
    with_body("patch", "/api/milestones/{id}", "milestones", "Update a milestone"),
    op("delete", "/api/milestones/{id}", "milestones", "Delete a milestone"),
    // Boards
    list("/api/boards", "boards", "List boards", &["project_id"]),
    with_body("post", "/api/boards", "boards", "Create a board"),
    op("get", "/api/boards/{id}", "boards", "Get a board"),
    with_body("patch", "/api/boards/{id}", "boards", "Rename a board"),
    op("delete", "/api/boards/{id}", "boards", "Delete a board"),
    op("get", "/api/boards/{id}/view", "boards", "Cards by column, filtered by priority, assignee, milestone_id or search"),
    with_body("post", "/api/boards/{id}/columns", "boards", "Add a column"),
    with_body("post", "/api/boards/{id}/columns/reorder", "boards", "Reorder columns"),
    with_body("patch", "/api/boards/{id}/columns/{column_id}", "boards", "Rename a column"),
    op("delete", "/api/boards/{id}/columns/{column_id}", "boards", "Delete a column and its tasks"),
    // Tasks
    list(
        "/api/tasks",
        "tasks",
        "List tasks",
        &["board_id", "column_id", "priority", "milestone_id", "prd_id", "assignee"],
    ),
    with_body("post", "/api/tasks", "tasks", "Create a task"),
    op("get", "/api/tasks/{id}", "tasks", "Get a task"),
    with_body("patch", "/api/tasks/{id}", "tasks", "Update a task"),
    op("delete", "/api/tasks/{id}", "tasks", "Delete a task"),
    with_body("post", "/api/tasks/{id}/move", "tasks", "Move a task to a column position"),
    list("/api/tasks/{id}/subtasks", "subtasks", "List subtasks", &[]),
    with_body("post", "/api/tasks/{id}/subtasks", "subtasks", "Create a subtask"),
    with_body("post", "/api/tasks/{id}/subtasks/reorder", "subtasks", "Reorder subtasks"),
    op("get", "/api/subtasks/{id}", "subtasks", "Get a subtask"),
    with_body("patch", "/api/subtasks/{id}", "subtasks", "Update a subtask"),
    op("delete", "/api/subtasks/{id}", "subtasks", "Delete a subtask"),
    // PRDs
    list("/api/prds", "prds", "List PRDs", &["project_id", "status"]),
    with_body("post", "/api/prds", "prds", "Create a PRD"),
    op("get", "/api/prds/{id}", "prds", "Get a PRD"),
    with_body("patch", "/api/prds/{id}", "prds", "Edit a PRD (creates a version)"),
    op("delete", "/api/prds/{id}", "prds", "Delete a PRD"),
    with_body("post", "/api/prds/{id}/status", "prds", "Change PRD status"),
    op("get", "/api/prds/{id}/transitions", "prds", "Allowed status transitions"),
    op("get", "/api/prds/{id}/versions", "prds", "List PRD versions"),
    op("get", "/api/prds/{id}/versions/{version}", "prds", "Get a PRD version"),
    op("post", "/api/prds/{id}/versions/{version}/restore", "prds", "Restore a PRD version"),
    op("get", "/api/prds/{id}/requirements", "prds", "Requirement lines of a PRD"),
    op("post", "/api/prds/{id}/extract", "prds", "Draft tasks from a PRD"),
    with_body("post", "/api/prds/{id}/tasks", "prds", "Create tasks from a PRD"),
    // Activity, reports, search
    list("/api/activity", "activity", "Activity log, newest first", &["entity_type", "entity_id"]),
    list("/api/reports", "reports", "List reports", &["report_type"]),
    with_body("post", "/api/reports", "reports", "Store a report"),
    op("get", "/api/reports/{id}", "reports", "Get a report"),
    op("delete", "/api/reports/{id}", "reports", "Delete a report"),
    op("get", "/api/search", "search", "Ranked search across entities (q, limit, offset)"),
];

fn path_params(path: &str) -> impl Iterator<Item = &str> {
    path.split('/')
        .filter_map(|seg| seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')))
}

fn query_param(name: &str, schema: Value, description: &str) -> Value {
    json!({
        "name": name,
        "in": "query",
        "required": false,
        "description": description,
        "schema": schema,
    })
}

fn operation(route: &Route) -> Value {
    let mut parameters: Vec<Value> = path_params(route.path)
        .map(|name| {
            json!({
                "name": name,
                "in": "path",
                "required": true,
                "schema": {"type": "string"},
            })
        })
        .collect();

    if let Some(filters) = route.list_filters {
        parameters.push(query_param(
            "limit",
            json!({"type": "integer", "minimum": 1, "maximum": 200, "default": 50}),
            "Page size",
        ));
        parameters.push(query_param(
            "offset",
            json!({"type": "integer", "minimum": 0, "default": 0}),
            "Rows to skip",
        ));
        if route.path != "/api/activity" {
            parameters.push(query_param(
                "search",
                json!({"type": "string"}),
                "Case-insensitive substring",
            ));
        }
        for filter in filters {
            parameters.push(query_param(filter, json!({"type": "string"}), "Exact match"));
        }
    }
    if route.path.starts_with("/api") {
        parameters.push(json!({
            "name": "X-Benos-Actor",
            "in": "header",
            "required": false,
            "description": "user:<id> or agent:<id>; defaults to user:local",
            "schema": {"type": "string"},
        }));
    }

    let success = match route.method {
        "post" if route.path.ends_with("/reorder")
            || route.path.ends_with("/move")
            || route.path.ends_with("/status")
            || route.path.ends_with("/restore")
            || route.path.ends_with("/extract") =>
        {
            "200"
        }
        "post" => "201",
        "delete" if !route.path.contains("/columns/") => "204",
        _ => "200",
    };
    let mut responses = Map::new();
    responses.insert(success.to_string(), json!({"description": "Success"}));
    if route.path.starts_with("/api") {
        let error = json!({"$ref": "#/components/responses/Error"});
        responses.insert("400".into(), error.clone());
        responses.insert("404".into(), error.clone());
        responses.insert("429".into(), json!({"$ref": "#/components/responses/RateLimited"}));
        responses.insert("500".into(), error);
    }

    let mut op = json!({
        "summary": route.summary,
        "tags": [route.tag],
        "parameters": parameters,
        "responses": responses,
    });
    if route.body {
        op["requestBody"] = json!({
            "required": true,
            "content": {"application/json": {"schema": {"type": "object"}}},
        });
    }
    op
}

/// The OpenAPI document for the server.
pub fn document() -> Value {
    let mut paths = Map::new();
    for route in ROUTES {
        let entry = paths
            .entry(route.path.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(methods) = entry {
            methods.insert(route.method.to_string(), operation(route));
        }
    }

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Ben OS API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Areas, projects, milestones, boards, tasks, PRDs and reports.",
        },
        "paths": paths,
        "components": {
            "schemas": {
                "Error": {
                    "type": "object",
                    "required": ["error"],
                    "properties": {"error": {"type": "string"}},
                }
            },
            "responses": {
                "Error": {
                    "description": "Error",
                    "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Error"}}},
                },
                "RateLimited": {
                    "description": "Rate limit exceeded",
                    "headers": {
                        "Retry-After": {"schema": {"type": "integer"}},
                        "X-RateLimit-Limit": {"schema": {"type": "integer"}},
                        "X-RateLimit-Remaining": {"schema": {"type": "integer"}},
                    },
                    "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Error"}}},
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_route_is_documented_once() {
        let doc = document();
        let paths = doc["paths"].as_object().unwrap();
        let operations: usize = paths.values().map(|m| m.as_object().unwrap().len()).sum();
        assert_eq!(operations, ROUTES.len());
    }

    #[test]
    fn test_path_parameters_are_declared() {
        let doc = document();
        let params = doc["paths"]["/api/boards/{id}/columns/{column_id}"]["patch"]["parameters"]
            .as_array()
            .unwrap();
        let names: Vec<&str> = params
            .iter()
            .filter(|p| p["in"] == "path")
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["id", "column_id"]);
    }

    #[test]
    fn test_list_routes_document_pagination() {
        let doc = document();
        let params = doc["paths"]["/api/tasks"]["get"]["parameters"].as_array().unwrap();
        let limit = params.iter().find(|p| p["name"] == "limit").unwrap();
        assert_eq!(limit["schema"]["maximum"], 200);
        assert_eq!(limit["schema"]["default"], 50);
        assert!(params.iter().any(|p| p["name"] == "prd_id"));
        assert!(doc["paths"]["/api/tasks"]["post"]["responses"]["201"].is_object());

        let nested = doc["paths"]["/api/tasks/{id}/subtasks"]["get"]["parameters"]
            .as_array()
            .unwrap();
        for name in ["id", "limit", "offset", "search"] {
            assert!(nested.iter().any(|p| p["name"] == name), "missing {}", name);
        }
    }
}
