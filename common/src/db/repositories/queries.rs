// Column lists shared by the repository queries

/// Columns of `job_queue`
pub mod job_queue_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"id, name, payload, scheduled_at, status, attempts,
        error_message, processed_at, entry_user_id, created_at"#;
}

/// Columns of `connector_execution_log`
pub mod execution_log_queries {
    /// `execution_activities` falls back to an empty array for rows written without one
    pub const SELECT_ALL_COLUMNS: &str = r#"id, connector_id, execution_start_datetime,
        execution_end_datetime,
        COALESCE(execution_activities, '[]'::jsonb) as execution_activities,
        total_errors, entry_user_id, entry_date_time"#;
}

/// Columns of the platform-owned `connector_specifications` table
pub mod connector_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"id, name, connector_type, host_name, timeout,
        maximum_retries, cron_schedule, disabled, entry_user_id,
        COALESCE(parameters, '{}'::jsonb) as parameters"#;
}
