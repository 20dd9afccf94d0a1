use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::policy::ClassPolicy;
use crate::reaper;

/// Manages per-gym engines. Each gym gets its own Engine + WAL + reaper.
/// Gym = database name from the pgwire connection.
pub struct GymManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    policy: Arc<ClassPolicy>,
}

impl GymManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, policy: Arc<ClassPolicy>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            policy,
        }
    }

    /// Get or lazily create an engine for the given gym.
    pub fn get_or_create(&self, gym: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(gym) {
            return Ok(engine.value().clone());
        }
        if gym.len() > MAX_GYM_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "gym name too long",
            ));
        }
        if self.engines.len() >= MAX_GYMS {
            return Err(std::io::Error::other("too many gyms"));
        }

        // Sanitize gym name to prevent path traversal
        let safe_name: String = gym
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty gym name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify, self.policy.clone())?);

        // Spawn reaper + compactor for this gym
        let reaper_engine = engine.clone();
        tokio::spawn(async move {
            reaper::run_reaper(reaper_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(gym.to_string(), engine.clone());
        metrics::gauge!(crate::observability::GYMS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tatami_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn make_manager(dir: PathBuf) -> GymManager {
        GymManager::new(dir, 1000, Arc::new(ClassPolicy::default()))
    }

    #[tokio::test]
    async fn gym_isolation() {
        let dir = test_data_dir("isolation");
        let gm = make_manager(dir);

        let eng_a = gm.get_or_create("gym_a").unwrap();
        let eng_b = gm.get_or_create("gym_b").unwrap();

        let coach = Ulid::new();
        let date = NaiveDate::from_ymd_opt(2099, 1, 10).unwrap();

        // Create same coach ID in both gyms
        eng_a.create_coach(coach, "Ana".into()).await.unwrap();
        eng_b.create_coach(coach, "Bo".into()).await.unwrap();

        // Advertise a slot in gym A only
        eng_a
            .add_slot(coach, date, "9:00 AM - 10:00 AM".into(), "Boxing".into())
            .await
            .unwrap();

        let slots_a = eng_a.get_slots(coach, date.and_hms_opt(0, 0, 0).unwrap()).await.unwrap();
        let slots_b = eng_b.get_slots(coach, date.and_hms_opt(0, 0, 0).unwrap()).await.unwrap();
        assert_eq!(slots_a.len(), 1);
        assert!(slots_b.is_empty());
    }

    #[tokio::test]
    async fn gym_lazy_creation() {
        let dir = test_data_dir("lazy");
        let gm = make_manager(dir.clone());

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        // Create a gym
        let _eng = gm.get_or_create("my_db").unwrap();

        // WAL file should now exist
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn gym_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let gm = make_manager(dir);

        let eng1 = gm.get_or_create("foo").unwrap();
        let eng2 = gm.get_or_create("foo").unwrap();

        // Should be the same Arc
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn gym_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let gm = make_manager(dir.clone());

        // Path traversal attempt
        let _eng = gm.get_or_create("../evil").unwrap();
        // Should create "evil.wal", not "../evil.wal"
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = gm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn gym_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let gm = make_manager(dir);

        let long_name = "x".repeat(MAX_GYM_NAME_LEN + 1);
        let result = gm.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("gym name too long"));
    }

    #[tokio::test]
    async fn gym_count_limit() {
        let dir = test_data_dir("count_limit");
        let gm = make_manager(dir);

        for i in 0..MAX_GYMS {
            gm.get_or_create(&format!("g{i}")).unwrap();
        }
        let result = gm.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many gyms"));
    }
}
