use std::{fmt, str::FromStr};

use chrono::NaiveDateTime;
use diesel::{
    backend::Backend,
    deserialize,
    deserialize::FromSql,
    expression::AsExpression,
    helper_types::AsExprOf,
    sql_types::{Integer, Text},
};

use crate::{
    error::ValidationError,
    schema::{course, participation, score, server, tournament, user},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromSqlRow)]
pub enum VehicleClass {
    Cc150,
    Cc200,
    Mirror,
}

impl Default for VehicleClass {
    fn default() -> Self {
        VehicleClass::Cc150
    }
}

impl<DB> FromSql<Text, DB> for VehicleClass
where
    DB: Backend,
    String: FromSql<Text, DB>,
{
    fn from_sql(bytes: Option<&DB::RawValue>) -> deserialize::Result<Self> {
        match String::from_sql(bytes)?.as_str() {
            "150cc" => Ok(VehicleClass::Cc150),
            "200cc" => Ok(VehicleClass::Cc200),
            // older rows were written with the french label
            "Mirror" | "Miroir" => Ok(VehicleClass::Mirror),
            x => Err(format!("Unrecognized vehicle class {}", x).into()),
        }
    }
}

impl AsExpression<Text> for VehicleClass {
    type Expression = AsExprOf<String, Text>;

    fn as_expression(self) -> Self::Expression {
        <String as AsExpression<Text>>::as_expression(self.to_string())
    }
}

impl<'a> AsExpression<Text> for &'a VehicleClass {
    type Expression = AsExprOf<String, Text>;

    fn as_expression(self) -> Self::Expression {
        <String as AsExpression<Text>>::as_expression(self.to_string())
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            VehicleClass::Cc150 => write!(f, "150cc"),
            VehicleClass::Cc200 => write!(f, "200cc"),
            VehicleClass::Mirror => write!(f, "Mirror"),
        }
    }
}

impl FromStr for VehicleClass {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "150" | "150cc" => Ok(VehicleClass::Cc150),
            "200" | "200cc" => Ok(VehicleClass::Cc200),
            "mirror" | "miroir" => Ok(VehicleClass::Mirror),
            _ => Err(ValidationError::VehicleClass(s.to_string())),
        }
    }
}

/// Review state of a submitted time. The discriminants are the rows of the
/// `score_status` lookup table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromSqlRow)]
pub enum ScoreStatus {
    Pending,
    Verified,
    Archived,
    Rejected,
}

impl ScoreStatus {
    pub const ALL: [ScoreStatus; 4] = [
        ScoreStatus::Pending,
        ScoreStatus::Verified,
        ScoreStatus::Archived,
        ScoreStatus::Rejected,
    ];

    pub fn id(self) -> i32 {
        match self {
            ScoreStatus::Pending => 1,
            ScoreStatus::Verified => 2,
            ScoreStatus::Archived => 3,
            ScoreStatus::Rejected => 4,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        ScoreStatus::ALL.iter().copied().find(|s| s.id() == id)
    }

    pub fn description(self) -> &'static str {
        match self {
            ScoreStatus::Pending => "Awaiting review",
            ScoreStatus::Verified => "Verified, counts for the ranking",
            ScoreStatus::Archived => "Superseded by a better verified time",
            ScoreStatus::Rejected => "Rejected by an admin",
        }
    }
}

impl<DB> FromSql<Integer, DB> for ScoreStatus
where
    DB: Backend,
    i32: FromSql<Integer, DB>,
{
    fn from_sql(bytes: Option<&DB::RawValue>) -> deserialize::Result<Self> {
        let id = i32::from_sql(bytes)?;
        ScoreStatus::from_id(id).ok_or_else(|| format!("Unrecognized score status {}", id).into())
    }
}

impl AsExpression<Integer> for ScoreStatus {
    type Expression = AsExprOf<i32, Integer>;

    fn as_expression(self) -> Self::Expression {
        <i32 as AsExpression<Integer>>::as_expression(self.id())
    }
}

impl<'a> AsExpression<Integer> for &'a ScoreStatus {
    type Expression = AsExprOf<i32, Integer>;

    fn as_expression(self) -> Self::Expression {
        <i32 as AsExpression<Integer>>::as_expression(self.id())
    }
}

impl fmt::Display for ScoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ScoreStatus::Pending => write!(f, "pending"),
            ScoreStatus::Verified => write!(f, "verified"),
            ScoreStatus::Archived => write!(f, "archived"),
            ScoreStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable)]
pub struct Server {
    pub server_id: i64,
    pub name: String,
    pub prefix: String,
    pub admin_role_id: Option<i64>,
}

#[derive(Debug, Insertable)]
#[table_name = "server"]
pub struct NewServer<'a> {
    pub server_id: i64,
    pub name: &'a str,
    pub prefix: &'a str,
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable)]
#[table_name = "course"]
pub struct Course {
    pub course_id: i64,
    pub name: String,
    pub cup: String,
    pub origin: String,
    pub image: Option<String>,
}

impl Course {
    /// Absolute image references are kept as-is, relative ones are joined to
    /// the configured base url.
    pub fn image_url(&self, base: Option<&str>) -> Option<String> {
        let image = self.image.as_deref()?;
        if image.starts_with("http://") || image.starts_with("https://") {
            return Some(image.to_string());
        }
        base.map(|b| format!("{}/{}", b.trim_end_matches('/'), image.trim_start_matches('/')))
    }
}

#[derive(Debug, Clone, PartialEq, Queryable)]
pub struct User {
    pub user_id: i64,
    pub discord_id: i64,
    pub username: String,
}

#[derive(Debug, Insertable)]
#[table_name = "user"]
pub struct NewUser<'a> {
    pub discord_id: i64,
    pub username: &'a str,
}

#[derive(Debug, Clone, PartialEq, Queryable)]
pub struct Tournament {
    pub tournament_id: i64,
    pub server_id: i64,
    pub course_id: i64,
    pub vehicle_class: VehicleClass,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub is_active: bool,
    pub message_id: Option<i64>,
    pub channel_id: Option<i64>,
    pub thread_id: Option<i64>,
    pub leaderboard_message_id: Option<i64>,
    pub reminder_sent_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[table_name = "tournament"]
pub struct NewTournament {
    pub server_id: i64,
    pub course_id: i64,
    pub vehicle_class: VehicleClass,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub is_active: bool,
}

/// A tournament joined with the course it is raced on.
#[derive(Debug, Clone, PartialEq)]
pub struct TournamentDetails {
    pub tournament: Tournament,
    pub course: Course,
}

impl From<(Tournament, Course)> for TournamentDetails {
    fn from((tournament, course): (Tournament, Course)) -> Self {
        TournamentDetails { tournament, course }
    }
}

#[derive(Debug, Insertable)]
#[table_name = "participation"]
pub struct NewParticipation {
    pub tournament_id: i64,
    pub user_id: i64,
    pub join_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Queryable)]
pub struct Score {
    pub score_id: i64,
    pub participation_id: i64,
    pub time_ms: i64,
    pub proof_url: Option<String>,
    pub submitted_at: NaiveDateTime,
    pub status: ScoreStatus,
}

#[derive(Debug, Insertable)]
#[table_name = "score"]
pub struct NewScore<'a> {
    pub participation_id: i64,
    pub time_ms: i64,
    pub proof_url: Option<&'a str>,
    pub submitted_at: NaiveDateTime,
    pub status_id: ScoreStatus,
}

/// One score row of a tournament along with who submitted it, as needed to
/// build a leaderboard.
#[derive(Debug, Clone, PartialEq, Queryable)]
pub struct ScoreEntry {
    pub score_id: i64,
    pub participation_id: i64,
    pub user_id: i64,
    pub discord_id: i64,
    pub username: String,
    pub time_ms: i64,
    pub proof_url: Option<String>,
    pub submitted_at: NaiveDateTime,
    pub status: ScoreStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_class_accepts_common_spellings() {
        assert_eq!("150cc".parse::<VehicleClass>(), Ok(VehicleClass::Cc150));
        assert_eq!("200".parse::<VehicleClass>(), Ok(VehicleClass::Cc200));
        assert_eq!("MIRROR".parse::<VehicleClass>(), Ok(VehicleClass::Mirror));
        assert_eq!("Miroir".parse::<VehicleClass>(), Ok(VehicleClass::Mirror));
        assert!("100cc".parse::<VehicleClass>().is_err());
    }

    #[test]
    fn score_status_ids_match_lookup_rows() {
        for status in ScoreStatus::ALL {
            assert_eq!(ScoreStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(ScoreStatus::from_id(0), None);
    }

    #[test]
    fn course_image_urls() {
        let mut course = Course {
            course_id: 1,
            name: "Mario Kart Stadium".to_string(),
            cup: "Mushroom Cup".to_string(),
            origin: "Mario Kart 8".to_string(),
            image: Some("mario-kart-stadium.png".to_string()),
        };
        assert_eq!(course.image_url(None), None);
        assert_eq!(
            course.image_url(Some("https://cdn.example/courses/")),
            Some("https://cdn.example/courses/mario-kart-stadium.png".to_string())
        );
        course.image = Some("https://elsewhere.example/a.png".to_string());
        assert_eq!(
            course.image_url(None),
            Some("https://elsewhere.example/a.png".to_string())
        );
    }
}
