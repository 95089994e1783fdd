//! Domain records returned by the LMS API.
//!
//! Only the fields the client itself relies on are typed; everything else is
//! kept in `extra` so records survive backend additions and can be written
//! back unchanged.

use chrono::{DateTime, Utc};
use lms_core::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A class ("kelas").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    /// Identifier
    pub id: RecordId,
    /// Class name (e.g. "7A")
    #[serde(default)]
    pub name: String,
    /// Homeroom teacher
    #[serde(default, rename = "teacherId", skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<RecordId>,
    /// Other fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An assignment ("tugas").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Identifier
    pub id: RecordId,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Class the assignment belongs to
    #[serde(default, rename = "classId", skip_serializing_if = "Option::is_none")]
    pub class_id: Option<RecordId>,
    /// Submission deadline
    #[serde(default, rename = "dueDate", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Other fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    /// Identifier
    pub id: RecordId,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Start time
    #[serde(default, rename = "startAt", skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    /// Duration in minutes
    #[serde(default, rename = "durationMinutes", skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    /// Other fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    /// Identifier
    pub id: RecordId,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Other fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A gamification badge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    /// Identifier
    pub id: RecordId,
    /// Badge name
    #[serde(default)]
    pub name: String,
    /// Points awarded
    #[serde(default)]
    pub points: i64,
    /// Other fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A report shared with a parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentReport {
    /// Identifier
    pub id: RecordId,
    /// Student the report is about
    #[serde(default, rename = "studentId", skip_serializing_if = "Option::is_none")]
    pub student_id: Option<RecordId>,
    /// Reporting period (e.g. "2025/2026 Ganjil")
    #[serde(default)]
    pub period: String,
    /// Other fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_survive() {
        let raw = json!({
            "id": "tg-1",
            "title": "Laporan praktikum",
            "classId": 3,
            "dueDate": "2026-01-15T10:00:00Z",
            "maxScore": 100
        });

        let assignment: Assignment = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(assignment.id, RecordId::from("tg-1"));
        assert_eq!(assignment.class_id, Some(RecordId::from(3)));
        assert_eq!(assignment.extra.get("maxScore"), Some(&json!(100)));

        assert_eq!(serde_json::to_value(&assignment).unwrap(), raw);
    }

    #[test]
    fn test_sparse_records() {
        let badge: Badge = serde_json::from_value(json!({ "id": 1 })).unwrap();
        assert_eq!(badge.points, 0);
        assert!(badge.name.is_empty());
    }
}
