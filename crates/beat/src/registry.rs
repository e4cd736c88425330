use std::collections::HashMap;
use std::sync::RwLock;

use cronbeat_domain::TaskIdentity;

/// 静态任务标识注册表
///
/// 任务实现由worker侧在编译期提供，调度侧只按名字选择已注册
/// 的标识；存储中的任务源码永远不会被编译或执行。
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskIdentity>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个任务标识，同名标识被覆盖
    pub fn register(&self, identity: TaskIdentity) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        tasks.insert(identity.name.clone(), identity);
    }

    /// 按名字注册，使用默认路由
    pub fn register_name(&self, name: &str) {
        self.register(TaskIdentity::with_default_routing(name));
    }

    pub fn get(&self, name: &str) -> Option<TaskIdentity> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = tasks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
