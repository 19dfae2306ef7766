//! Queue routing.
//!
//! Two pure mappings, both frozen at construction:
//! - static: task name -> queue (submission-time routing),
//! - dynamic: classification key -> GPU queue (pipeline-stage routing, with
//!   a default category so an unrecognized classification degrades to the
//!   default model instead of aborting the task).

use std::collections::HashMap;

use crate::config::PrismConfig;
use crate::domain::{PrismError, QueueName, TaskName};

pub struct Router {
    static_routes: HashMap<TaskName, QueueName>,
    gpu_routes: HashMap<String, QueueName>,
    gpu_default: QueueName,
}

impl Router {
    /// Build the fixed tables from config: io/cpu/gpu task names and the
    /// three GPU category pools.
    pub fn from_config(config: &PrismConfig) -> Self {
        let io = QueueName::new(config.queue_io.clone());
        let cpu = QueueName::new(config.queue_cpu.clone());
        let main = QueueName::new(config.queue_main.clone());

        let mut static_routes = HashMap::new();
        static_routes.insert(TaskName::new("download_image"), io.clone());
        static_routes.insert(TaskName::new("upload_result"), io);
        static_routes.insert(TaskName::new("classify_image"), cpu.clone());
        static_routes.insert(TaskName::new("encode_result"), cpu);
        static_routes.insert(TaskName::new("image_super_resolution_pipeline"), main);

        let mut gpu_routes = HashMap::new();
        gpu_routes.insert(
            "general".to_string(),
            QueueName::new(config.queue_gpu_general.clone()),
        );
        gpu_routes.insert(
            "portrait".to_string(),
            QueueName::new(config.queue_gpu_portrait.clone()),
        );
        gpu_routes.insert(
            "landscape".to_string(),
            QueueName::new(config.queue_gpu_landscape.clone()),
        );

        let gpu_default = gpu_routes
            .get(config.gpu_default_category.as_str())
            .cloned()
            .unwrap_or_else(|| QueueName::new(config.queue_gpu_general.clone()));

        Self {
            static_routes,
            gpu_routes,
            gpu_default,
        }
    }

    /// Builder used by embedders that register their own handlers.
    pub fn builder() -> RouterBuilder {
        RouterBuilder {
            static_routes: HashMap::new(),
            gpu_routes: HashMap::new(),
            gpu_default: None,
        }
    }

    /// Static resolution: task name -> queue.
    pub fn route(&self, name: &TaskName) -> Result<QueueName, PrismError> {
        self.static_routes
            .get(name)
            .cloned()
            .ok_or_else(|| PrismError::UnroutableTask(name.clone()))
    }

    /// Dynamic GPU resolution. Never fails: unknown keys fall back to the
    /// default pool.
    pub fn route_dynamic(&self, classification_key: &str) -> QueueName {
        self.gpu_routes
            .get(classification_key)
            .cloned()
            .unwrap_or_else(|| self.gpu_default.clone())
    }
}

pub struct RouterBuilder {
    static_routes: HashMap<TaskName, QueueName>,
    gpu_routes: HashMap<String, QueueName>,
    gpu_default: Option<QueueName>,
}

impl RouterBuilder {
    pub fn static_route(mut self, name: impl Into<TaskName>, queue: impl Into<QueueName>) -> Self {
        self.static_routes.insert(name.into(), queue.into());
        self
    }

    pub fn gpu_route(mut self, category: impl Into<String>, queue: impl Into<QueueName>) -> Self {
        self.gpu_routes.insert(category.into(), queue.into());
        self
    }

    pub fn gpu_default(mut self, queue: impl Into<QueueName>) -> Self {
        self.gpu_default = Some(queue.into());
        self
    }

    pub fn build(self) -> Router {
        let gpu_default = self
            .gpu_default
            .unwrap_or_else(|| QueueName::new("gpu-general"));
        Router {
            static_routes: self.static_routes,
            gpu_routes: self.gpu_routes,
            gpu_default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn router() -> Router {
        Router::from_config(&PrismConfig::default())
    }

    #[rstest]
    #[case("download_image", "io")]
    #[case("upload_result", "io")]
    #[case("classify_image", "cpu")]
    #[case("encode_result", "cpu")]
    #[case("image_super_resolution_pipeline", "main")]
    fn static_routes_match_config(#[case] name: &str, #[case] queue: &str) {
        let r = router();
        assert_eq!(r.route(&TaskName::new(name)).unwrap().as_str(), queue);
    }

    #[test]
    fn unknown_name_is_unroutable() {
        let r = router();
        let err = r.route(&TaskName::new("no_such_task")).unwrap_err();
        assert!(matches!(err, PrismError::UnroutableTask(_)));
    }

    #[rstest]
    #[case("general", "gpu-general")]
    #[case("portrait", "gpu-portrait")]
    #[case("landscape", "gpu-landscape")]
    fn dynamic_routes_by_category(#[case] key: &str, #[case] queue: &str) {
        let r = router();
        assert_eq!(r.route_dynamic(key).as_str(), queue);
    }

    #[test]
    fn unrecognized_classification_falls_back_to_default() {
        let r = router();
        assert_eq!(r.route_dynamic("sepia-cat").as_str(), "gpu-general");
        assert_eq!(r.route_dynamic("").as_str(), "gpu-general");
    }

    #[test]
    fn builder_routes_take_effect() {
        let r = Router::builder()
            .static_route("resize", "cpu")
            .gpu_route("anime", "gpu-anime")
            .gpu_default("gpu-anime")
            .build();
        assert_eq!(r.route(&TaskName::new("resize")).unwrap().as_str(), "cpu");
        assert_eq!(r.route_dynamic("anime").as_str(), "gpu-anime");
        assert_eq!(r.route_dynamic("unknown").as_str(), "gpu-anime");
    }
}
