//! Store key layout

pub const HOSTS_DIR: &str = "/registry/hosts";
pub const CONTROLLERS_DIR: &str = "/registry/controllers";
pub const EVENTS_DIR: &str = "/events";

/// Directory holding the task documents bound to `machine`
pub fn tasks_dir(machine: &str) -> String {
    format!("{}/{}/tasks", HOSTS_DIR, machine)
}

pub fn task_key(machine: &str, task_id: &str) -> String {
    format!("{}/{}", tasks_dir(machine), task_id)
}

/// The manifest list a node agent reconciles against
pub fn manifest_key(machine: &str) -> String {
    format!("{}/{}/kubelet", HOSTS_DIR, machine)
}

pub fn controller_key(id: &str) -> String {
    format!("{}/{}", CONTROLLERS_DIR, id)
}

pub fn event_dir(container_name: &str) -> String {
    format!("{}/{}", EVENTS_DIR, container_name)
}
