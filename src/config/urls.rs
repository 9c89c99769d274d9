//! Task, gear and git host URLs

/// Group directory of an archived task (`_<group>`)
pub fn archive_group(task_no: u64) -> u64 {
    (task_no / 10_000) * 10
}

/// Path of a live task descriptor
pub fn task_info_path(task_no: u64) -> String {
    format!("/tasks/{task_no}/info.json")
}

/// Path of an archived task descriptor
pub fn archived_task_info_path(task_no: u64) -> String {
    format!(
        "/tasks/archive/done/_{}/{task_no}/info.json",
        archive_group(task_no)
    )
}

/// Default base URL for task descriptors
pub fn task_info_base(host: &str) -> String {
    format!("https://{host}")
}

/// Base URL for relative gear paths
pub fn git_host(host: &str) -> String {
    format!("https://{host}/")
}

/// Base URL for task gear repositories
pub fn gitery_host(host: &str) -> String {
    format!("git://{host}/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_group() {
        assert_eq!(archive_group(9_999), 0);
        assert_eq!(archive_group(312_345), 310);
    }

    #[test]
    fn test_task_info_paths() {
        assert_eq!(task_info_path(100), "/tasks/100/info.json");
        assert_eq!(
            archived_task_info_path(312_345),
            "/tasks/archive/done/_310/312345/info.json"
        );
    }
}
