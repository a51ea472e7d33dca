//! The fixed field set of the event registration form and the values
//! written into it.

use crate::config::EventConfig;
use crate::logging::Reporter;
use crate::normalizer::normalize_date;
use crate::retry::DEFAULT_MAX_ATTEMPTS;
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Text,
    MultiLineText,
    Dropdown,
    RadioGroup,
    CheckboxGroup,
    /// Date input plus hour and minute text inputs.
    DateTime,
}

/// Declaration order matches [`FORM_FIELDS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKey {
    EventName,
    AndroidSupport,
    StartDateTime,
    EndDateTime,
    RegisterEvent,
    EventHost,
    EventContent,
    Genres,
    ParticipationConditions,
    ParticipationMethod,
    Remarks,
    OverseasAnnouncement,
    XAnnouncement,
}

impl FieldKey {
    pub fn spec(self) -> &'static FieldSpec {
        &FORM_FIELDS[self as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: FieldKey,
    pub label: &'static str,
    pub kind: ControlKind,
    pub attempts: u32,
}

const fn field(key: FieldKey, label: &'static str, kind: ControlKind) -> FieldSpec {
    FieldSpec {
        key,
        label,
        kind,
        attempts: DEFAULT_MAX_ATTEMPTS,
    }
}

pub const FORM_FIELDS: [FieldSpec; 13] = [
    field(FieldKey::EventName, "イベント名", ControlKind::Text),
    field(FieldKey::AndroidSupport, "Android対応可否", ControlKind::RadioGroup),
    field(FieldKey::StartDateTime, "開始日時", ControlKind::DateTime),
    field(FieldKey::EndDateTime, "終了日時", ControlKind::DateTime),
    field(FieldKey::RegisterEvent, "イベントを登録しますか", ControlKind::Dropdown),
    field(FieldKey::EventHost, "イベント主催者", ControlKind::Text),
    field(FieldKey::EventContent, "イベント内容", ControlKind::MultiLineText),
    field(FieldKey::Genres, "イベントジャンル", ControlKind::CheckboxGroup),
    field(FieldKey::ParticipationConditions, "参加条件", ControlKind::MultiLineText),
    field(FieldKey::ParticipationMethod, "参加方法", ControlKind::MultiLineText),
    field(FieldKey::Remarks, "備考", ControlKind::MultiLineText),
    field(FieldKey::OverseasAnnouncement, "海外ユーザー向け告知", ControlKind::Dropdown),
    field(FieldKey::XAnnouncement, "X告知文", ControlKind::MultiLineText),
];

/// Answer chosen for the registration confirmation question.
pub const REGISTER_EVENT_ANSWER: &str = "イベントを登録する";
pub const OVERSEAS_WANTED: &str = "希望する";
/// Placeholder the overseas question starts with.
pub const OVERSEAS_UNSET: &str = "選択";

pub fn overseas_choice(wanted: bool) -> &'static str {
    if wanted { OVERSEAS_WANTED } else { OVERSEAS_UNSET }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Choice(String),
    Choices(Vec<String>),
    DateTime {
        date: NaiveDate,
        hour: String,
        minute: String,
    },
}

/// Everything written during one run. Built once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormValues {
    values: BTreeMap<FieldKey, FieldValue>,
    pub record_reply_email: bool,
}

impl FormValues {
    /// Resolve config into form values against the reference date `today`.
    ///
    /// Unparseable dates are reported as warnings and replaced by `today`.
    /// A blank end date reuses the normalized start date.
    pub fn from_config(config: &EventConfig, today: NaiveDate, reporter: &Reporter) -> Self {
        let normalize = |raw: &str| match normalize_date(raw, today) {
            Ok(date) => date,
            Err(err) => {
                reporter.warn(format!("{err}; using {today}"));
                today
            }
        };

        let start_date = normalize(&config.start_date);
        let end_date = if config.end_date.trim().is_empty() {
            start_date
        } else {
            normalize(&config.end_date)
        };

        let text = |s: &str| FieldValue::Text(s.to_string());
        let values = BTreeMap::from([
            (FieldKey::EventName, text(&config.event_name)),
            (
                FieldKey::AndroidSupport,
                FieldValue::Choice(config.android_support.clone()),
            ),
            (
                FieldKey::StartDateTime,
                FieldValue::DateTime {
                    date: start_date,
                    hour: config.start_hour.clone(),
                    minute: config.start_minute.clone(),
                },
            ),
            (
                FieldKey::EndDateTime,
                FieldValue::DateTime {
                    date: end_date,
                    hour: config.end_hour.clone(),
                    minute: config.end_minute.clone(),
                },
            ),
            (
                FieldKey::RegisterEvent,
                FieldValue::Choice(REGISTER_EVENT_ANSWER.to_string()),
            ),
            (FieldKey::EventHost, text(&config.event_host)),
            (FieldKey::EventContent, text(&config.event_content)),
            (FieldKey::Genres, FieldValue::Choices(config.genres.clone())),
            (
                FieldKey::ParticipationConditions,
                text(&config.participation_conditions),
            ),
            (
                FieldKey::ParticipationMethod,
                text(&config.participation_method),
            ),
            (FieldKey::Remarks, text(&config.remarks)),
            (
                FieldKey::OverseasAnnouncement,
                FieldValue::Choice(overseas_choice(config.overseas_announcement).to_string()),
            ),
            (FieldKey::XAnnouncement, text(&config.x_announcement)),
        ]);

        Self {
            values,
            record_reply_email: config.record_the_email_address_to_reply,
        }
    }

    pub fn get(&self, key: FieldKey) -> Option<&FieldValue> {
        self.values.get(&key)
    }

    pub fn date(&self, key: FieldKey) -> Option<NaiveDate> {
        match self.values.get(&key) {
            Some(FieldValue::DateTime { date, .. }) => Some(*date),
            _ => None,
        }
    }
}
