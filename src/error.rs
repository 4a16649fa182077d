use std::{error::Error, fmt};

use chrono::NaiveDateTime;

use crate::db::models::ScoreStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct TimeFormatError {
    details: String,
}

impl TimeFormatError {
    pub(crate) fn new(msg: &str) -> TimeFormatError {
        TimeFormatError {
            details: msg.to_string(),
        }
    }
}

impl fmt::Display for TimeFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Invalid time \"{}\". Use mm:ss:SSS (e.g. 1:23:456)",
            self.details
        )
    }
}

impl Error for TimeFormatError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Time(TimeFormatError),
    VehicleClass(String),
    Duration(i64),
    Proof(String),
    Prefix(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Time(e) => write!(f, "{}", e),
            ValidationError::VehicleClass(c) => write!(
                f,
                "Unknown vehicle class \"{}\". Available classes: 150cc, 200cc, Mirror",
                c
            ),
            ValidationError::Duration(d) => write!(
                f,
                "A tournament must last between 1 and 90 days (got {})",
                d
            ),
            ValidationError::Proof(reason) => write!(f, "Proof rejected: {}", reason),
            ValidationError::Prefix(reason) => write!(f, "Invalid prefix: {}", reason),
        }
    }
}

impl Error for ValidationError {}

impl From<TimeFormatError> for ValidationError {
    fn from(err: TimeFormatError) -> Self {
        ValidationError::Time(err)
    }
}

/// Everything a tournament operation can refuse to do. Anything but
/// `Persistence` is a user mistake or a state conflict and is shown verbatim.
#[derive(Debug)]
pub enum TournamentError {
    Invalid(ValidationError),
    AlreadyActive {
        course_name: String,
        end_date: NaiveDateTime,
    },
    NoActiveTournament,
    CourseNotFound(String),
    NoCourses,
    NotParticipating,
    NoScores,
    ScoreIndexOutOfRange {
        index: usize,
        count: usize,
    },
    ScoreNotReviewable {
        status: ScoreStatus,
    },
    Persistence(anyhow::Error),
}

impl TournamentError {
    pub fn is_persistence(&self) -> bool {
        matches!(self, TournamentError::Persistence(_))
    }
}

impl fmt::Display for TournamentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TournamentError::Invalid(e) => write!(f, "{}", e),
            TournamentError::AlreadyActive {
                course_name,
                end_date,
            } => write!(
                f,
                "A tournament on **{}** is already running until {}",
                course_name,
                end_date.format("%d/%m/%Y")
            ),
            TournamentError::NoActiveTournament => {
                write!(f, "There is no tournament running on this server")
            }
            TournamentError::CourseNotFound(name) => write!(
                f,
                "No course matches \"{}\". Check the spelling or leave it empty for a random course",
                name
            ),
            TournamentError::NoCourses => write!(f, "The course catalog is empty"),
            TournamentError::NotParticipating => {
                write!(f, "That player is not taking part in the current tournament")
            }
            TournamentError::NoScores => write!(f, "No time has been submitted yet"),
            TournamentError::ScoreIndexOutOfRange { index, count } => write!(
                f,
                "There is no time #{} (the player has {} time(s))",
                index, count
            ),
            TournamentError::ScoreNotReviewable { status } => {
                write!(f, "That time is {} and can no longer be reviewed", status)
            }
            TournamentError::Persistence(_) => {
                write!(f, "Something went wrong on our side, please retry")
            }
        }
    }
}

impl Error for TournamentError {}

impl From<ValidationError> for TournamentError {
    fn from(err: ValidationError) -> Self {
        TournamentError::Invalid(err)
    }
}

impl From<diesel::result::Error> for TournamentError {
    fn from(err: diesel::result::Error) -> Self {
        TournamentError::Persistence(err.into())
    }
}

impl From<anyhow::Error> for TournamentError {
    fn from(err: anyhow::Error) -> Self {
        TournamentError::Persistence(err)
    }
}
