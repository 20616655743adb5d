//! Short random identifiers for jobs and workers.

use rand::distributions::Alphanumeric;
use rand::Rng;

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// Generated job id: `job_<8 alphanumeric chars>`.
pub fn job_id() -> String {
    format!("job_{}", random_suffix())
}

/// Per-process worker id: `worker_<8 alphanumeric chars>`.
pub fn worker_id() -> String {
    format!("worker_{}", random_suffix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_shapes() {
        let job = job_id();
        assert!(job.starts_with("job_"));
        assert_eq!(job.len(), "job_".len() + 8);

        let worker = worker_id();
        assert!(worker.starts_with("worker_"));
        assert_eq!(worker.len(), "worker_".len() + 8);
    }

    #[test]
    fn test_ids_are_distinct() {
        assert_ne!(job_id(), job_id());
    }
}
