// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Course lookup by id.

use dashmap::DashMap;

use crate::model::Course;

/// Source of course reference data
pub trait CourseCatalog: Send + Sync {
    fn course(&self, id: &str) -> Option<Course>;
}

/// Concurrent in-memory catalog
#[derive(Default)]
pub struct InMemoryCatalog {
    courses: DashMap<String, Course>,
}

impl InMemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a course; returns the previous entry
    pub fn insert(&self, course: Course) -> Option<Course> {
        self.courses.insert(course.id.clone(), course)
    }

    pub fn remove(&self, id: &str) -> Option<Course> {
        self.courses.remove(id).map(|(_, course)| course)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.courses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }
}

impl FromIterator<Course> for InMemoryCatalog {
    fn from_iter<I: IntoIterator<Item = Course>>(iter: I) -> Self {
        let catalog = Self::new();
        for course in iter {
            catalog.insert(course);
        }
        catalog
    }
}

impl CourseCatalog for InMemoryCatalog {
    fn course(&self, id: &str) -> Option<Course> {
        self.courses.get(id).map(|c| c.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let catalog: InMemoryCatalog = [Course::sample("CS1101", &["AL01"]), Course::sample("MA1021", &[])]
            .into_iter()
            .collect();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.course("CS1101").unwrap().sections.len(), 1);
        assert!(catalog.course("XX0000").is_none());

        catalog.remove("CS1101");
        assert!(catalog.course("CS1101").is_none());
    }
}
