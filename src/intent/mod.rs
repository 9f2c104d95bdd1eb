//! Intent classification: a fast regex-rule cascade for obvious commands,
//! falling back to the talker LLM for ambiguous phrasing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::adapter::DualModelAdapter;

/// Supported intent categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    HomeLightControl,
    HomeAcControl,
    HomeStatus,
    HomeScene,
    HomePresence,
    HomeEnergy,
    HomeComfort,
    MediaSearch,
    MediaDownload,
    MediaQueue,
    MediaConfirm,
    MediaStats,
    SystemStatus,
    SystemTime,
    SystemWeather,
    SystemLocation,
    SystemSearch,
    SystemHelp,
    SystemTools,
    GeneralChat,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::HomeLightControl => "home_light_control",
            Intent::HomeAcControl => "home_ac_control",
            Intent::HomeStatus => "home_status",
            Intent::HomeScene => "home_scene",
            Intent::HomePresence => "home_presence",
            Intent::HomeEnergy => "home_energy",
            Intent::HomeComfort => "home_comfort",
            Intent::MediaSearch => "media_search",
            Intent::MediaDownload => "media_download",
            Intent::MediaQueue => "media_queue",
            Intent::MediaConfirm => "media_confirm",
            Intent::MediaStats => "media_stats",
            Intent::SystemStatus => "system_status",
            Intent::SystemTime => "system_time",
            Intent::SystemWeather => "system_weather",
            Intent::SystemLocation => "system_location",
            Intent::SystemSearch => "system_search",
            Intent::SystemHelp => "system_help",
            Intent::SystemTools => "system_tools",
            Intent::GeneralChat => "general_chat",
            Intent::Unknown => "unknown",
        }
    }

    fn from_str(s: &str) -> Option<Intent> {
        Some(match s {
            "home_light_control" => Intent::HomeLightControl,
            "home_ac_control" => Intent::HomeAcControl,
            "home_status" => Intent::HomeStatus,
            "home_scene" => Intent::HomeScene,
            "home_presence" => Intent::HomePresence,
            "home_energy" => Intent::HomeEnergy,
            "home_comfort" => Intent::HomeComfort,
            "media_search" => Intent::MediaSearch,
            "media_download" => Intent::MediaDownload,
            "media_queue" => Intent::MediaQueue,
            "media_confirm" => Intent::MediaConfirm,
            "media_stats" => Intent::MediaStats,
            "system_status" => Intent::SystemStatus,
            "system_time" => Intent::SystemTime,
            "system_weather" => Intent::SystemWeather,
            "system_location" => Intent::SystemLocation,
            "system_search" => Intent::SystemSearch,
            "system_help" => Intent::SystemHelp,
            "system_tools" => Intent::SystemTools,
            "general_chat" => Intent::GeneralChat,
            _ => return None,
        })
    }
}

/// Result of intent classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedIntent {
    pub intent: Intent,
    pub confidence: f32,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub used_llm: bool,
    #[serde(default)]
    pub classification_ms: u64,
}

impl ClassifiedIntent {
    fn quick(intent: Intent, confidence: f32, params: HashMap<String, serde_json::Value>, start: Instant) -> Self {
        Self {
            intent,
            confidence,
            parameters: params,
            used_llm: false,
            classification_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn p(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
    pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
}

const ROOM_ALIASES: &[(&str, &[&str])] = &[
    ("bedroom", &["bedroom", "bed room", "my room", "master bedroom", "main bedroom"]),
    ("lounge", &["lounge", "living room", "living", "front room", "sitting room"]),
    ("kitchen", &["kitchen", "cooking area"]),
    ("bathroom", &["bathroom", "bath room", "ensuite", "en-suite", "toilet", "restroom"]),
    ("hallway", &["hallway", "hall", "passage", "corridor"]),
    ("study", &["study", "office", "server room", "work room"]),
    ("spare", &["spare room", "spare", "guest room", "guest bedroom", "guest"]),
    ("outside", &["outside", "front yard", "backyard", "back yard", "porch", "front door"]),
    ("scullery", &["scullery", "laundry", "utility"]),
];

const AC_MODE_ALIASES: &[(&str, &[&str])] = &[
    ("cool", &["cool", "cooling", "cold", "colder"]),
    ("heat", &["heat", "heating", "warm", "warmer", "hot"]),
    ("auto", &["auto", "automatic", "smart"]),
    ("dry", &["dry", "dehumidify", "dehumidifier"]),
    ("fan_only", &["fan", "fan only", "fan mode", "ventilate"]),
    ("off", &["off", "turn off", "switch off", "stop"]),
];

fn normalize_room(text: &str) -> Option<&'static str> {
    ROOM_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.iter().any(|a| text.contains(a)))
        .map(|(room, _)| *room)
}

fn normalize_ac_mode(text: &str) -> Option<&'static str> {
    AC_MODE_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.iter().any(|a| text.contains(a)))
        .map(|(mode, _)| *mode)
}

fn extract_temperature(text: &str) -> Option<i32> {
    static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,2})").unwrap());
    for cap in DIGITS.captures_iter(text) {
        if let Ok(temp) = cap[1].parse::<i32>() {
            if (15..=35).contains(&temp) {
                return Some(temp);
            }
        }
    }
    None
}

macro_rules! re {
    ($name:ident, $pat:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($pat).unwrap());
    };
}

re!(RE_LIGHT_WORD, r"(light|lamp|bedroom|lounge|kitchen|bathroom|hallway|study|spare|outside)");
re!(RE_LIGHT_VERB, r"(turn|switch|on|off)");
re!(RE_LIGHTS_STANDALONE, r"^lights?\s+(on|off)$|^(all\s+)?lights\s+(on|off)");
re!(RE_AC_STATUS, r"(ac|aircon|air\s*con)\s*(status|temp|temperature)|what.*(ac|aircon).*(temp|set)|how\s*(cold|hot|warm)");
re!(RE_AC_MODE_WORD, r"(set\s+)?(ac|aircon)\s*(mode\s+)?(cool|heat|dry|fan)|(cool|heat|dry|fan)\s+mode|(ac|aircon)\s+(off|auto)");
re!(RE_AC_SET_TO, r"(set|change|put|switch).*(ac|aircon|air\s*con).*(to|mode)");
re!(RE_AC_TEMP, r"(set|change).*(ac|aircon|temp|temperature).*\d|ac.*\d.*degree|\d+\s*degree");
re!(RE_FAN, r"(fan\s*(speed|mode)|set\s*fan).*(auto|low|medium|high|turbo)");
re!(RE_FAN_VALUE, r"(auto|low|medium|high|turbo)");
re!(RE_HOME_STATUS, r"home\s*status|house\s*status|what\s*lights\s*(are\s*)?(on|off)?$|what.*(is|are)\s+(on|off)\s*$");
re!(RE_HOME_STATUS_EXCLUDE, r"(bedroom|lounge|kitchen|bathroom|hallway|study|spare|outside).*(on|off)");
re!(RE_SCENE, r"(activate|run|start|set)\s*(scene|mode)\s+\w+|goodnight|movie\s*(time|mode)|leaving\s*home");
re!(RE_SCENE_NAME, r"(goodnight|movie|leaving|morning|evening|party|romantic)");
re!(RE_PRESENCE, r"who.*(home|here)|anyone\s*home|is\s*\w+\s*home");
re!(RE_MEDIA_QUEUE, r"what.*(download|queue)|download.*(status|queue)|what.*(downloading)");
re!(RE_MEDIA_DOWNLOAD, r"(download|get\s*me|add)\s+(the\s+)?(movie|show|series|anime)?\s*['\x22]?[\w\s]+");
re!(RE_MEDIA_CONFIRM, r"confirm\s*(download|add)|yes\s*(download|add)");
re!(RE_MEDIA_STATS, r"(tracking|media)\s*stats|download\s*history");
re!(RE_TIME, r"what\s*time|current\s*time|time\s*is\s*it|what.*(date|day)");
re!(RE_SYSTEM_STATUS, r"system\s*status|service\s*status|health\s*check|are\s*you\s*(ok|working|alive)");
re!(RE_HELP, r"what\s*can\s*you\s*do|help|capabilities|commands|how\s*do\s*i");
re!(RE_TOOLS, r"list\s*tools|what\s*tools|available\s*tools");
re!(RE_GREETING, r"^(hi|hello|hey|good\s*(morning|afternoon|evening)|howdy|sup|yo)\s*[!?.]?\s*$");
re!(RE_WEATHER_LOC, r"weather\s+(?:in|for|at)\s+(.+?)(?:\?|$)");

/// Fast rule-based classification. Returns `None` when nothing matches
/// confidently, signaling that the LLM fallback should run.
fn quick_classify(message: &str) -> Option<ClassifiedIntent> {
    let start = Instant::now();
    let msg = message.to_lowercase();
    let msg = msg.trim();

    if RE_LIGHT_WORD.is_match(msg) && RE_LIGHT_VERB.is_match(msg) {
        let action = if msg.contains(" off") { "off" } else { "on" };
        let mut room = normalize_room(msg);
        if msg.contains("all") && room.is_none() {
            room = Some("all");
        }
        let params = p(&[
            ("action", action.into()),
            ("room", room.map(|r| r.into()).unwrap_or(serde_json::Value::Null)),
        ]);
        return Some(ClassifiedIntent::quick(Intent::HomeLightControl, 0.95, params, start));
    }

    if RE_LIGHTS_STANDALONE.is_match(msg) {
        let action = if msg.contains(" on") { "on" } else { "off" };
        let params = p(&[("action", action.into()), ("room", "all".into())]);
        return Some(ClassifiedIntent::quick(Intent::HomeLightControl, 0.9, params, start));
    }

    if RE_AC_STATUS.is_match(msg) {
        let params = p(&[("action", "status".into())]);
        return Some(ClassifiedIntent::quick(Intent::HomeAcControl, 0.9, params, start));
    }

    if RE_AC_MODE_WORD.is_match(msg) {
        if let Some(mode) = normalize_ac_mode(msg) {
            let params = p(&[("action", "set_mode".into()), ("mode", mode.into())]);
            return Some(ClassifiedIntent::quick(Intent::HomeAcControl, 0.9, params, start));
        }
    }

    if RE_AC_SET_TO.is_match(msg) {
        if let Some(mode) = normalize_ac_mode(msg) {
            let params = p(&[("action", "set_mode".into()), ("mode", mode.into())]);
            return Some(ClassifiedIntent::quick(Intent::HomeAcControl, 0.9, params, start));
        }
    }

    if RE_AC_TEMP.is_match(msg) {
        if let Some(temp) = extract_temperature(msg) {
            let params = p(&[("action", "set_temp".into()), ("temperature", temp.into())]);
            return Some(ClassifiedIntent::quick(Intent::HomeAcControl, 0.9, params, start));
        }
    }

    if RE_FAN.is_match(msg) {
        if let Some(m) = RE_FAN_VALUE.find(msg) {
            let params = p(&[("action", "set_fan".into()), ("fan", m.as_str().into())]);
            return Some(ClassifiedIntent::quick(Intent::HomeAcControl, 0.9, params, start));
        }
    }

    if RE_HOME_STATUS.is_match(msg) && !RE_HOME_STATUS_EXCLUDE.is_match(msg) {
        return Some(ClassifiedIntent::quick(Intent::HomeStatus, 0.95, HashMap::new(), start));
    }

    if RE_SCENE.is_match(msg) {
        let scene = RE_SCENE_NAME.find(msg).map(|m| m.as_str());
        let params = p(&[("scene_name", scene.map(|s| s.into()).unwrap_or(serde_json::Value::Null))]);
        return Some(ClassifiedIntent::quick(Intent::HomeScene, 0.9, params, start));
    }

    if RE_PRESENCE.is_match(msg) {
        return Some(ClassifiedIntent::quick(Intent::HomePresence, 0.95, HashMap::new(), start));
    }

    if RE_MEDIA_QUEUE.is_match(msg) {
        return Some(ClassifiedIntent::quick(Intent::MediaQueue, 0.95, HashMap::new(), start));
    }

    if RE_MEDIA_DOWNLOAD.is_match(msg) {
        let media_type = if msg.contains("movie") {
            Some("movie")
        } else if msg.contains("show") || msg.contains("series") {
            Some("series")
        } else if msg.contains("anime") {
            Some("anime")
        } else {
            None
        };
        let params = p(&[
            ("query", msg.into()),
            ("media_type", media_type.map(|m| m.into()).unwrap_or(serde_json::Value::Null)),
        ]);
        return Some(ClassifiedIntent::quick(Intent::MediaDownload, 0.85, params, start));
    }

    if RE_MEDIA_CONFIRM.is_match(msg) {
        return Some(ClassifiedIntent::quick(Intent::MediaConfirm, 0.95, HashMap::new(), start));
    }

    if RE_MEDIA_STATS.is_match(msg) {
        return Some(ClassifiedIntent::quick(Intent::MediaStats, 0.95, HashMap::new(), start));
    }

    if RE_TIME.is_match(msg) {
        return Some(ClassifiedIntent::quick(Intent::SystemTime, 0.95, HashMap::new(), start));
    }

    if msg.contains("weather") {
        let location = RE_WEATHER_LOC.captures(msg).map(|c| c[1].trim().to_string());
        let params = match location {
            Some(loc) => p(&[("location", loc.into())]),
            None => HashMap::new(),
        };
        return Some(ClassifiedIntent::quick(Intent::SystemWeather, 0.95, params, start));
    }

    if RE_SYSTEM_STATUS.is_match(msg) {
        return Some(ClassifiedIntent::quick(Intent::SystemStatus, 0.95, HashMap::new(), start));
    }

    if RE_HELP.is_match(msg) {
        return Some(ClassifiedIntent::quick(Intent::SystemHelp, 0.9, HashMap::new(), start));
    }

    if RE_TOOLS.is_match(msg) {
        return Some(ClassifiedIntent::quick(Intent::SystemTools, 0.95, HashMap::new(), start));
    }

    if RE_GREETING.is_match(msg) {
        return Some(ClassifiedIntent::quick(Intent::GeneralChat, 0.95, HashMap::new(), start));
    }

    None
}

/// Extract the first balanced JSON object from a string, tolerating a
/// markdown code fence or leading prose around it.
fn extract_json(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();

    if let Some(stripped) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    {
        let stripped = stripped.strip_suffix("```").unwrap_or(stripped).trim();
        if let Ok(v) = serde_json::from_str(stripped) {
            return Some(v);
        }
    }

    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }

    // Balanced-brace scan, tracking string/escape state.
    let bytes = trimmed.as_bytes();
    let mut depth = 0i32;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        if let Ok(v) = serde_json::from_str(&trimmed[s..=i]) {
                            return Some(v);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_llm_response(raw: &str) -> ClassifiedIntent {
    let Some(json) = extract_json(raw) else {
        return ClassifiedIntent {
            intent: Intent::GeneralChat,
            confidence: 0.5,
            parameters: HashMap::new(),
            used_llm: true,
            classification_ms: 0,
        };
    };

    let intent_str = json.get("intent").and_then(|v| v.as_str()).unwrap_or("general_chat");
    let intent = Intent::from_str(intent_str).unwrap_or_else(|| {
        // fuzzy substring fallback
        Intent::from_str(
            intent_str
                .split_whitespace()
                .next()
                .unwrap_or("general_chat"),
        )
        .unwrap_or(Intent::GeneralChat)
    });

    let confidence = json
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0) as f32;

    let parameters = json
        .get("parameters")
        .and_then(|v| v.as_object())
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    ClassifiedIntent {
        intent,
        confidence,
        parameters,
        used_llm: true,
        classification_ms: 0,
    }
}

const PROMPT_TEMPLATE: &str = r#"You are an intent classifier. Classify the user message into ONE of the known intents and extract parameters.

RULES:
1. Choose the MOST SPECIFIC intent that matches
2. Extract relevant parameters based on the intent
3. If unsure, use "general_chat"
4. Respond ONLY with valid JSON

OUTPUT FORMAT (JSON only, no markdown):
{"intent": "intent_name", "confidence": 0.0-1.0, "parameters": {}}

EXAMPLES:
User: "set ac to cool"
{"intent": "home_ac_control", "confidence": 0.95, "parameters": {"action": "set_mode", "mode": "cool"}}

User: "turn on bedroom light"
{"intent": "home_light_control", "confidence": 0.98, "parameters": {"room": "bedroom", "action": "on"}}

User: "download dune"
{"intent": "media_download", "confidence": 0.9, "parameters": {"query": "dune", "media_type": "movie"}}

User: "tell me a joke"
{"intent": "general_chat", "confidence": 0.95, "parameters": {}}

User: "{message}"
"#;

/// Intent classifier: fast rule cascade, with LLM fallback for ambiguous
/// messages. Never fails the caller — on any LLM error it degrades to a
/// `GeneralChat` guess.
pub struct IntentClassifier {
    llm_timeout_budget: Duration,
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self {
            llm_timeout_budget: Duration::from_secs(10),
        }
    }

    /// Classify `message`, consulting the talker LLM when the fast path
    /// doesn't reach 0.85 confidence.
    pub async fn classify(&self, message: &str, llm: Option<&DualModelAdapter>) -> ClassifiedIntent {
        let start = Instant::now();

        if let Some(quick) = quick_classify(message) {
            if quick.confidence >= 0.85 {
                return quick;
            }
        }

        let Some(llm) = llm else {
            return self.fallback(message, start);
        };

        let mut remaining = self.llm_timeout_budget;
        for attempt in 0..2u32 {
            let attempt_timeout = if attempt == 0 {
                remaining.mul_f32(1.0).min(remaining)
            } else {
                remaining.mul_f32(0.7).min(remaining)
            };
            let prompt = PROMPT_TEMPLATE.replace("{message}", message);
            let call_start = Instant::now();
            match tokio::time::timeout(attempt_timeout, llm.classify_raw(&prompt)).await {
                Ok(Ok(raw)) => {
                    let mut result = parse_llm_response(&raw);
                    if result.intent == Intent::GeneralChat && result.confidence <= 0.5 && attempt == 0 {
                        remaining = remaining.saturating_sub(call_start.elapsed());
                        continue;
                    }
                    result.classification_ms = start.elapsed().as_millis() as u64;
                    return result;
                }
                Ok(Err(e)) => {
                    warn!(attempt, err = %e, "intent classifier LLM call failed");
                }
                Err(_) => {
                    warn!(attempt, "intent classifier LLM call timed out");
                }
            }
            remaining = remaining.saturating_sub(call_start.elapsed());
            if remaining.is_zero() {
                break;
            }
        }

        self.fallback(message, start)
    }

    fn fallback(&self, message: &str, start: Instant) -> ClassifiedIntent {
        if let Some(quick) = quick_classify(message) {
            debug!(intent = quick.intent.as_str(), "intent fallback: quick-classify retry hit");
            return quick;
        }
        ClassifiedIntent {
            intent: Intent::GeneralChat,
            confidence: 0.3,
            parameters: HashMap::new(),
            used_llm: false,
            classification_ms: start.elapsed().as_millis() as u64,
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_control_on() {
        let r = quick_classify("turn on the bedroom light").unwrap();
        assert_eq!(r.intent, Intent::HomeLightControl);
        assert_eq!(r.parameters["action"], "on");
        assert_eq!(r.parameters["room"], "bedroom");
    }

    #[test]
    fn light_control_off_all() {
        let r = quick_classify("lights off").unwrap();
        assert_eq!(r.intent, Intent::HomeLightControl);
        assert_eq!(r.parameters["action"], "off");
        assert_eq!(r.parameters["room"], "all");
    }

    #[test]
    fn ac_set_mode() {
        let r = quick_classify("set ac to cool").unwrap();
        assert_eq!(r.intent, Intent::HomeAcControl);
        assert_eq!(r.parameters["mode"], "cool");
    }

    #[test]
    fn ac_set_temp() {
        let r = quick_classify("set temperature to 22 degrees").unwrap();
        assert_eq!(r.intent, Intent::HomeAcControl);
        assert_eq!(r.parameters["temperature"], 22);
    }

    #[test]
    fn home_status() {
        let r = quick_classify("home status").unwrap();
        assert_eq!(r.intent, Intent::HomeStatus);
    }

    #[test]
    fn presence_query() {
        let r = quick_classify("who is home").unwrap();
        assert_eq!(r.intent, Intent::HomePresence);
    }

    #[test]
    fn greeting_is_general_chat() {
        let r = quick_classify("hello!").unwrap();
        assert_eq!(r.intent, Intent::GeneralChat);
    }

    #[test]
    fn ambiguous_message_has_no_quick_match() {
        assert!(quick_classify("tell me about the history of rome").is_none());
    }

    #[test]
    fn extract_json_handles_fenced_block() {
        let raw = "```json\n{\"intent\": \"system_time\", \"confidence\": 0.9, \"parameters\": {}}\n```";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["intent"], "system_time");
    }

    #[test]
    fn extract_json_handles_surrounding_prose() {
        let raw = "Sure, here you go: {\"intent\": \"general_chat\", \"confidence\": 0.8, \"parameters\": {}} Thanks!";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["intent"], "general_chat");
    }

    #[test]
    fn parse_llm_response_unknown_intent_falls_back() {
        let r = parse_llm_response(r#"{"intent": "bogus_intent", "confidence": 0.9, "parameters": {}}"#);
        assert_eq!(r.intent, Intent::GeneralChat);
    }

    #[tokio::test]
    async fn classify_without_llm_uses_fallback() {
        let classifier = IntentClassifier::new();
        let result = classifier.classify("good morning", None).await;
        assert_eq!(result.intent, Intent::GeneralChat);
    }
}
