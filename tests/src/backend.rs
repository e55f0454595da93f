//! In-memory mock backend implementing the session seam.
//!
//! Mirrors the semantics of the real db and file backends: a tiny
//! users table and a file store behind one shared world, with per-tool
//! call counting and scriptable transient failures for retry tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use stratum_kernel::error::{PlanError, PlanResult};
use stratum_kernel::plan::ServerKind;
use stratum_runtime::router::SessionRouter;
use stratum_runtime::session::ToolSession;

#[derive(Debug, Clone)]
struct User {
    id: i64,
    name: String,
    email: String,
}

impl User {
    fn to_value(&self) -> Value {
        json!({"id": self.id, "name": self.name, "email": self.email})
    }
}

#[derive(Debug, Default)]
struct World {
    users: Vec<User>,
    next_id: i64,
    files: HashMap<String, String>,
}

/// Factory for mock sessions sharing one world.
#[derive(Clone, Default)]
pub struct MockBackend {
    world: Arc<Mutex<World>>,
    /// tool name -> remaining transient failures to inject
    failures: Arc<Mutex<HashMap<String, u32>>>,
    /// tool name -> calls observed (resource reads count as `read_file`)
    calls: Arc<Mutex<HashMap<String, u32>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.world.lock().next_id = 1;
        backend
    }

    /// Make the next `count` calls touching `tool` fail with a
    /// transport error before reaching the world.
    pub fn fail_times(&self, tool: &str, count: u32) {
        self.failures.lock().insert(tool.to_string(), count);
    }

    pub fn call_count(&self, tool: &str) -> u32 {
        self.calls.lock().get(tool).copied().unwrap_or(0)
    }

    /// Insert a user directly, bypassing the tool surface.
    pub fn seed_user(&self, name: &str, email: &str) -> i64 {
        let mut world = self.world.lock();
        let id = world.next_id;
        world.next_id += 1;
        world.users.push(User {
            id,
            name: name.to_string(),
            email: email.to_string(),
        });
        id
    }

    pub fn users(&self) -> Vec<Value> {
        self.world.lock().users.iter().map(User::to_value).collect()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.world.lock().files.get(path).cloned()
    }

    /// A session view over this backend for `server`.
    pub fn session(&self, server: ServerKind) -> Arc<dyn ToolSession> {
        Arc::new(MockSession {
            backend: self.clone(),
            server,
        })
    }

    /// Router with one session per backend kind.
    pub fn router(&self) -> SessionRouter {
        self.router_with_pool(1)
    }

    /// Router with `pool_size` sessions per backend kind, all sharing
    /// this world.
    pub fn router_with_pool(&self, pool_size: usize) -> SessionRouter {
        use stratum_runtime::router::SessionPool;
        let mut pools = HashMap::new();
        for server in [ServerKind::Db, ServerKind::File] {
            let sessions: Vec<Arc<dyn ToolSession>> =
                (0..pool_size.max(1)).map(|_| self.session(server)).collect();
            pools.insert(server, SessionPool::new(sessions));
        }
        SessionRouter::new(pools)
    }

    fn record_call(&self, tool: &str) {
        *self.calls.lock().entry(tool.to_string()).or_insert(0) += 1;
    }

    fn take_failure(&self, tool: &str) -> bool {
        let mut failures = self.failures.lock();
        match failures.get_mut(tool) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn run_tool(&self, name: &str, args: &Map<String, Value>) -> PlanResult<Value> {
        let mut world = self.world.lock();
        match name {
            "create_user" => {
                let id = world.next_id;
                world.next_id += 1;
                let user = User {
                    id,
                    name: arg_str(args, "name"),
                    email: arg_str(args, "email"),
                };
                let value = user.to_value();
                world.users.push(user);
                Ok(value)
            }
            "update_user" => {
                let id = arg_int(args, "id");
                let new_name = args.get("name").and_then(Value::as_str).map(str::to_string);
                let new_email = args.get("email").and_then(Value::as_str).map(str::to_string);
                let user = world
                    .users
                    .iter_mut()
                    .find(|user| user.id == id)
                    .ok_or_else(|| remote("update_user", format!("User {id} not found")))?;
                if let Some(new_name) = new_name {
                    user.name = new_name;
                }
                if let Some(new_email) = new_email {
                    user.email = new_email;
                }
                Ok(user.to_value())
            }
            "delete_user" => {
                let id = arg_int(args, "id");
                let position = world
                    .users
                    .iter()
                    .position(|user| user.id == id)
                    .ok_or_else(|| remote("delete_user", format!("User {id} not found")))?;
                world.users.remove(position);
                Ok(json!({"deleted_id": id}))
            }
            "list_users" => {
                let name_filter = args.get("name_filter").and_then(Value::as_str);
                let email_filter = args.get("email_filter").and_then(Value::as_str);
                let users: Vec<Value> = world
                    .users
                    .iter()
                    .filter(|user| name_filter.is_none_or(|f| user.name.contains(f)))
                    .filter(|user| email_filter.is_none_or(|f| user.email.contains(f)))
                    .map(User::to_value)
                    .collect();
                Ok(Value::Array(users))
            }
            "get_user_by_id" => {
                let id = arg_int(args, "id");
                world
                    .users
                    .iter()
                    .find(|user| user.id == id)
                    .map(User::to_value)
                    .ok_or_else(|| remote("get_user_by_id", format!("User {id} not found")))
            }
            "write_file" => {
                let path = arg_str(args, "path");
                let content = match args.get("content") {
                    Some(Value::String(text)) => text.clone(),
                    Some(value) => value.to_string(),
                    None => String::new(),
                };
                world.files.insert(path.clone(), content);
                Ok(json!({"path": path, "status": "ok"}))
            }
            other => Err(remote(other, format!("Tool not found: {other}"))),
        }
    }
}

fn arg_str(args: &Map<String, Value>, name: &str) -> String {
    args.get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn arg_int(args: &Map<String, Value>, name: &str) -> i64 {
    args.get(name).and_then(Value::as_i64).unwrap_or_default()
}

fn remote(tool: &str, message: String) -> PlanError {
    PlanError::Remote {
        tool: tool.to_string(),
        message,
    }
}

/// Session view over a [`MockBackend`] world.
pub struct MockSession {
    backend: MockBackend,
    server: ServerKind,
}

#[async_trait]
impl ToolSession for MockSession {
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> PlanResult<Value> {
        self.backend.record_call(name);
        if self.backend.take_failure(name) {
            return Err(PlanError::Transport {
                server: self.server.to_string(),
                message: "injected transport failure".to_string(),
            });
        }
        let payload = self.backend.run_tool(name, &arguments)?;
        Ok(json!({"content": [{"type": "text", "text": payload.to_string()}]}))
    }

    async fn read_resource(&self, path: &str) -> PlanResult<Value> {
        self.backend.record_call("read_file");
        if self.backend.take_failure("read_file") {
            return Err(PlanError::Transport {
                server: self.server.to_string(),
                message: "injected transport failure".to_string(),
            });
        }
        let text = self.backend.file(path).ok_or_else(|| PlanError::Remote {
            tool: "read_file".to_string(),
            message: format!("File not allowed: {path}"),
        })?;
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn shutdown(&self) -> PlanResult<()> {
        Ok(())
    }
}
