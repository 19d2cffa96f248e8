//! API endpoint paths
//!
//! Paths are relative to the configured base URL, which already carries the
//! `/api/v1` version prefix.

/// List all courses visible to the token
pub fn courses() -> String {
    "/courses".to_string()
}

/// List the sections of one course
pub fn course_sections(course_id: i64) -> String {
    format!("/courses/{course_id}/sections")
}

/// List the enrollments of one course
pub fn course_enrollments(course_id: i64) -> String {
    format!("/courses/{course_id}/enrollments")
}
