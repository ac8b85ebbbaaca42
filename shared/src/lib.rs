use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub mod date;
pub mod protocol;

pub use chrono;
pub use date::Timestamp;

// =========================================================
// Constants
// =========================================================

pub const DEFAULT_UNIVERSITY_DOMAIN: &str = "uom.lk";
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// Page size of a single candidate fetch.
pub const CANDIDATE_PAGE_SIZE: usize = 10;

/// Interests offered by the onboarding form.
pub const INTEREST_CATALOGUE: &[&str] = &[
    "Technology",
    "Sports",
    "Music",
    "Reading",
    "Travel",
    "Cooking",
    "Gaming",
    "Art",
    "Photography",
    "Fitness",
    "Movies",
    "Dancing",
    "Writing",
    "Nature",
    "Fashion",
    "Food",
    "Languages",
    "Volunteering",
];

// =========================================================
// Identity
// =========================================================

/// Account record owned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Identity {
    /// Splits the display name into (first, last), falling back to the email
    /// local part when no display name was set.
    pub fn name_parts(&self) -> (String, String) {
        let source = match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.email.split('@').next().unwrap_or_default().to_string(),
        };
        let mut words = source.split_whitespace();
        let first = words.next().unwrap_or_default().to_string();
        let last = words.collect::<Vec<_>>().join(" ");
        (first, last)
    }
}

// =========================================================
// Profile
// =========================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Gender {
    Male,
    Female,
    Other,
    PreferNotToSay,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::PreferNotToSay => "prefer-not-to-say",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            "prefer-not-to-say" => Ok(Gender::PreferNotToSay),
            other => Err(format!("unknown gender: {}", other)),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Matching-relevant user record owned by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(
        default,
        with = "date::flexible_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_of_birth: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_of_study: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<u8>,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub interests: BTreeSet<String>,
    #[serde(default)]
    pub looking_for: String,
    #[serde(default)]
    pub show_email: bool,
    #[serde(default)]
    pub show_phone: bool,
    #[serde(default)]
    pub profile_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            id: String::new(),
            email: None,
            display_name: None,
            first_name: String::new(),
            last_name: String::new(),
            date_of_birth: None,
            gender: None,
            student_id: None,
            faculty: None,
            department: None,
            year_of_study: None,
            semester: None,
            bio: String::new(),
            interests: BTreeSet::new(),
            looking_for: String::new(),
            show_email: false,
            show_phone: false,
            profile_completed: false,
            profile_image: None,
            is_active: true,
            last_seen: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.display_name.clone().unwrap_or_default()
        } else {
            name.to_string()
        }
    }

    /// Age in whole years on the given day.
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        let born = self.date_of_birth?.date_naive();
        let mut age = today.year() - born.year();
        if (today.month(), today.day()) < (born.month(), born.day()) {
            age -= 1;
        }
        u32::try_from(age).ok()
    }

    /// Merges a patch into the profile. Absent patch fields leave the
    /// profile untouched.
    pub fn apply(&mut self, patch: &ProfilePatch) {
        macro_rules! set {
            ($field:ident) => {
                if let Some(v) = &patch.$field {
                    self.$field = v.clone();
                }
            };
            (opt $field:ident) => {
                if let Some(v) = &patch.$field {
                    self.$field = Some(v.clone());
                }
            };
        }

        set!(first_name);
        set!(last_name);
        set!(opt date_of_birth);
        set!(opt gender);
        set!(opt student_id);
        set!(opt faculty);
        set!(opt department);
        set!(opt year_of_study);
        set!(opt semester);
        set!(bio);
        set!(interests);
        set!(looking_for);
        set!(show_email);
        set!(show_phone);
        set!(profile_completed);
        set!(opt profile_image);
        set!(is_active);
    }
}

/// Partial profile update. `None` means "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(
        default,
        with = "date::flexible_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_of_birth: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_of_study: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interests: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub looking_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_email: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_phone: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self == &ProfilePatch::default()
    }

    /// Folds `other` into `self`; fields set in `other` win.
    pub fn merge(&mut self, other: &ProfilePatch) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(
                    if other.$field.is_some() {
                        self.$field = other.$field.clone();
                    }
                )*
            };
        }
        take!(
            first_name,
            last_name,
            date_of_birth,
            gender,
            student_id,
            faculty,
            department,
            year_of_study,
            semester,
            bio,
            interests,
            looking_for,
            show_email,
            show_phone,
            profile_completed,
            profile_image,
            is_active
        );
    }

    /// 去掉空白文本与空兴趣集合，只保留有内容的字段
    pub fn without_blanks(mut self) -> Self {
        for field in [
            &mut self.first_name,
            &mut self.last_name,
            &mut self.student_id,
            &mut self.faculty,
            &mut self.department,
            &mut self.bio,
            &mut self.looking_for,
            &mut self.profile_image,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
        if self.interests.as_ref().is_some_and(BTreeSet::is_empty) {
            self.interests = None;
        }
        self
    }
}

// =========================================================
// Likes & Matches
// =========================================================

/// Directed like edge. Never mutated or deleted by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub from_user_id: String,
    pub to_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Server-confirmed mutual like between two users.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    #[serde(alias = "_id", alias = "matchId")]
    pub id: String,
    #[serde(alias = "users")]
    pub user_ids: [String; 2],
    #[serde(default, alias = "timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_user: Option<Profile>,
}

impl Match {
    /// Whether this match joins `a` and `b`, in either order.
    pub fn joins(&self, a: &str, b: &str) -> bool {
        let [x, y] = &self.user_ids;
        (x == a && y == b) || (x == b && y == a)
    }

    pub fn other_user_id(&self, me: &str) -> Option<&str> {
        let [x, y] = &self.user_ids;
        if x == me {
            Some(y)
        } else if y == me {
            Some(x)
        } else {
            None
        }
    }
}
