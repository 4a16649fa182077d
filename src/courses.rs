use std::{fs, path::Path};

use anyhow::{Context, Result};
use rand::{seq::SliceRandom, Rng};
use serde::Deserialize;

use crate::db::models::Course;

const BUNDLED_CATALOG: &str = include_str!("../data/courses.json");

const JOIN_PHRASES: [&str; 7] = [
    "Engines roar, {} hits the track!",
    "A new challenger appears! {} takes the wheel!",
    "Watch out, {} has stars in their eyes and a foot on the throttle!",
    "Rumor has it {} once beat a staff ghost... but keep that quiet!",
    "{} shows up with a blue shell and a lot of ambition!",
    "The Lakitus agree: {} could be the surprise of this tournament!",
    "A Boo whispered that {} knows every shortcut...",
];

#[derive(Debug, Deserialize)]
struct CourseSeed {
    id: i64,
    name: String,
    cup: String,
    origin: String,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    courses: Vec<CourseSeed>,
}

impl From<CourseSeed> for Course {
    fn from(seed: CourseSeed) -> Self {
        Course {
            course_id: seed.id,
            name: seed.name,
            cup: seed.cup,
            origin: seed.origin,
            image: seed.image,
        }
    }
}

pub fn parse_catalog(json: &str) -> Result<Vec<Course>> {
    let catalog: Catalog = serde_json::from_str(json).context("Error parsing course catalog")?;

    Ok(catalog.courses.into_iter().map(Course::from).collect())
}

/// Reads the catalog at `path`, or the one compiled into the binary when the
/// file does not exist.
pub fn load_catalog(path: &Path) -> Result<Vec<Course>> {
    if !path.exists() {
        info!(
            "No course catalog at {}, using the bundled one",
            path.display()
        );
        return parse_catalog(BUNDLED_CATALOG);
    }
    let json = fs::read_to_string(path)
        .with_context(|| format!("Error reading course catalog {}", path.display()))?;

    parse_catalog(&json)
}

// lowercase alphanumerics only so "bowsers castle" finds "Bowser's Castle"
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Case- and punctuation-insensitive lookup: an exact name wins over a prefix,
/// which wins over a substring. Catalog order breaks ties.
pub fn find_course<'a>(courses: &'a [Course], query: &str) -> Option<&'a Course> {
    let needle = normalize(query);
    if needle.is_empty() {
        return None;
    }
    let names: Vec<String> = courses.iter().map(|c| normalize(&c.name)).collect();

    let position = names
        .iter()
        .position(|n| *n == needle)
        .or_else(|| names.iter().position(|n| n.starts_with(&needle)))
        .or_else(|| names.iter().position(|n| n.contains(&needle)))?;

    courses.get(position)
}

/// Every course whose name contains `term`, in catalog order. An empty term
/// matches everything.
pub fn search_courses<'a>(courses: &'a [Course], term: &str) -> Vec<&'a Course> {
    let needle = normalize(term);
    courses
        .iter()
        .filter(|c| normalize(&c.name).contains(&needle))
        .collect()
}

pub fn random_course<'a, R: Rng + ?Sized>(courses: &'a [Course], rng: &mut R) -> Option<&'a Course> {
    courses.choose(rng)
}

pub fn join_phrase<R: Rng + ?Sized>(rng: &mut R, mention: &str) -> String {
    let phrase = JOIN_PHRASES[rng.gen_range(0..JOIN_PHRASES.len())];

    phrase.replacen("{}", mention, 1)
}
