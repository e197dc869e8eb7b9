use rusqlite::types::Value;

use crate::models::DifficultyLabel;

/// Numeric filter. An exact value wins over the inclusive bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Range {
    pub exact: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Range {
    pub fn exact(value: f64) -> Self {
        Self {
            exact: Some(value),
            ..Self::default()
        }
    }

    pub fn between(min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            exact: None,
            min,
            max,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_none() && self.min.is_none() && self.max.is_none()
    }

    fn clause(&self, expr: &str, params: &mut Vec<Value>) -> Option<String> {
        if let Some(exact) = self.exact {
            params.push(Value::Real(exact));
            return Some(format!("{} = ?", expr));
        }
        let mut parts = Vec::new();
        if let Some(min) = self.min {
            params.push(Value::Real(min));
            parts.push(format!("{} >= ?", expr));
        }
        if let Some(max) = self.max {
            params.push(Value::Real(max));
            parts.push(format!("{} <= ?", expr));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" AND "))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SongQuery {
    /// Case-insensitive substring of any localized title.
    pub keyword: Option<String>,
    /// Restricts `level` and `notes` to one difficulty and requires it to exist.
    pub difficulty: Option<DifficultyLabel>,
    pub level: Range,
    pub notes: Range,
    pub bpm: Range,
    pub length: Range,
    pub band_id: Option<u32>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostQuery {
    pub keyword: Option<String>,
    pub artists: Option<String>,
    pub diff: Option<DifficultyLabel>,
    pub level: Range,
    pub author: Option<String>,
    /// Every tag must be present (case-insensitive, exact).
    pub tags: Vec<String>,
    pub notes: Range,
    pub bpm: Range,
    pub length: Range,
}

#[derive(Default)]
struct Filter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Filter {
    fn range(&mut self, expr: &str, range: &Range) {
        if let Some(clause) = range.clause(expr, &mut self.params) {
            self.clauses.push(format!("({})", clause));
        }
    }

    /// Same range applied to several expressions, any of which may match.
    fn range_any(&mut self, exprs: &[String], range: &Range) {
        if range.is_empty() {
            return;
        }
        let alternatives: Vec<String> = exprs
            .iter()
            .filter_map(|expr| range.clause(expr, &mut self.params))
            .map(|clause| format!("({})", clause))
            .collect();
        self.clauses.push(format!("({})", alternatives.join(" OR ")));
    }

    fn contains(&mut self, expr: &str, needle: &str) {
        self.params.push(Value::Text(like_pattern(needle)));
        self.clauses.push(format!("{} LIKE ? ESCAPE '\\'", expr));
    }

    fn equals(&mut self, expr: &str, value: Value) {
        self.params.push(value);
        self.clauses.push(format!("{} = ?", expr));
    }

    fn raw(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    fn finish(self) -> (String, Vec<Value>) {
        let clause = if self.clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            self.clauses.join(" AND ")
        };
        (clause, self.params)
    }
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn difficulty_path(field: &str, difficulty: DifficultyLabel, leaf: Option<&str>) -> String {
    match leaf {
        Some(leaf) => format!(
            "json_extract(doc, '$.{}.\"{}\".{}')",
            field,
            difficulty.index(),
            leaf
        ),
        None => format!("json_extract(doc, '$.{}.\"{}\"')", field, difficulty.index()),
    }
}

fn per_difficulty(field: &str, difficulty: Option<DifficultyLabel>, leaf: Option<&str>) -> Vec<String> {
    match difficulty {
        Some(d) => vec![difficulty_path(field, d, leaf)],
        None => DifficultyLabel::ALL
            .iter()
            .map(|&d| difficulty_path(field, d, leaf))
            .collect(),
    }
}

impl SongQuery {
    /// WHERE clause over the `songs` table and its positional parameters.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut filter = Filter::default();

        if let Some(keyword) = self.keyword.as_deref().filter(|k| !k.is_empty()) {
            filter.params.push(Value::Text(like_pattern(keyword)));
            filter.raw(
                "EXISTS (SELECT 1 FROM json_each(songs.doc, '$.musicTitle') AS title \
                 WHERE title.value IS NOT NULL AND title.value LIKE ? ESCAPE '\\')"
                    .to_string(),
            );
        }
        if let Some(difficulty) = self.difficulty {
            filter.raw(format!(
                "{} IS NOT NULL",
                difficulty_path("difficulty", difficulty, None)
            ));
        }
        filter.range_any(
            &per_difficulty("difficulty", self.difficulty, Some("playLevel")),
            &self.level,
        );
        filter.range_any(&per_difficulty("notes", self.difficulty, None), &self.notes);
        filter.range("main_bpm", &self.bpm);
        filter.range("json_extract(doc, '$.length')", &self.length);
        if let Some(band_id) = self.band_id {
            filter.equals("json_extract(doc, '$.bandId')", Value::Integer(band_id.into()));
        }
        if let Some(tag) = self.tag.as_deref().filter(|t| !t.is_empty()) {
            filter.equals("json_extract(doc, '$.tag')", Value::Text(tag.to_string()));
        }

        filter.finish()
    }
}

impl PostQuery {
    /// WHERE clause over the `posts` table and its positional parameters.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut filter = Filter::default();

        if let Some(keyword) = self.keyword.as_deref().filter(|k| !k.is_empty()) {
            filter.contains("json_extract(doc, '$.title')", keyword);
        }
        if let Some(artists) = self.artists.as_deref().filter(|a| !a.is_empty()) {
            filter.contains("json_extract(doc, '$.artists')", artists);
        }
        if let Some(diff) = self.diff {
            filter.equals("json_extract(doc, '$.diff')", Value::Integer(diff.index().into()));
        }
        filter.range("json_extract(doc, '$.level')", &self.level);
        if let Some(author) = self.author.as_deref().filter(|a| !a.is_empty()) {
            filter.contains("json_extract(doc, '$.author.username')", author);
        }
        for tag in self.tags.iter().filter(|t| !t.is_empty()) {
            filter.params.push(Value::Text(tag.clone()));
            filter.raw(
                "EXISTS (SELECT 1 FROM json_each(posts.doc, '$.tags') AS tag \
                 WHERE json_extract(tag.value, '$.type') = 'text' \
                 AND lower(json_extract(tag.value, '$.data')) = lower(?))"
                    .to_string(),
            );
        }
        filter.range("chart_notes", &self.notes);
        filter.range("chart_main_bpm", &self.bpm);
        filter.range("chart_time", &self.length);

        filter.finish()
    }
}
