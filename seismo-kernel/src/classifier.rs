/**
 * CLASSIFIEUR - Décision de routage pour chaque message MQTT
 *
 * RÔLE :
 * Fonction pure (topic, payload) -> enregistrements à persister. Aucun état,
 * aucune I/O : le pipeline appelle `classify` et décide du reste.
 *
 * RÈGLES (première qui matche gagne) :
 * 1. payload contenant le marqueur heartbeat (casse ignorée) -> Discard
 * 2. namespace logs générique                                -> Generic
 * 3. namespace sismique -> Seismic toujours, + Battery si une tension propre
 *    est trouvée (hors sentinelles ONLINE/OFFLINE et hors "confirmed")
 * 4. tout le reste                                           -> Discard
 *
 * La tension doit être un champ isolé : nombre décimal collé à l'unité V
 * (majuscule), borné à gauche par début/virgule et à droite par virgule/fin,
 * sans espace. "12.4V,OK" -> 12.4 ; "OK, 12.4V" ou "relay 12.4V drop" -> rien.
 */

use crate::config::TopicsConf;
use crate::models::ClassifiedRecord;
use regex::Regex;
use time::OffsetDateTime;

const VOLTAGE_PATTERN: &str = r"(?:^|,)(\d+(?:\.\d+)?)V(?:,|$)";
const CONFIRMED_MARKER: &str = "confirmed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Heartbeat,
    UnroutedTopic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Discard(DiscardReason),
    /// Un ou deux enregistrements (seismic + battery possible)
    Records(Vec<ClassifiedRecord>),
}

#[derive(Debug, Clone)]
pub struct Classifier {
    generic_prefix: String,
    seismic_prefix: String,
    heartbeat_marker: String,
    voltage: Regex,
}

impl Classifier {
    pub fn new(topics: &TopicsConf) -> Result<Self, regex::Error> {
        Ok(Self {
            generic_prefix: topics.generic_prefix.clone(),
            seismic_prefix: topics.seismic_prefix.clone(),
            heartbeat_marker: topics.heartbeat_marker.to_lowercase(),
            voltage: Regex::new(VOLTAGE_PATTERN)?,
        })
    }

    pub fn classify(&self, topic: &str, payload: &str, timestamp: OffsetDateTime) -> Classification {
        let lowered = payload.to_lowercase();
        if !self.heartbeat_marker.is_empty() && lowered.contains(&self.heartbeat_marker) {
            return Classification::Discard(DiscardReason::Heartbeat);
        }

        if in_namespace(topic, &self.generic_prefix) {
            return Classification::Records(vec![ClassifiedRecord::Generic {
                topic: topic.to_string(),
                value: payload.to_string(),
                timestamp,
            }]);
        }

        if in_namespace(topic, &self.seismic_prefix) {
            let node_id = node_id_of(topic);
            let mut records = vec![ClassifiedRecord::Seismic {
                node_id: node_id.to_string(),
                text: payload.to_string(),
                timestamp,
            }];
            if let Some(voltage) = self.battery_voltage(payload, &lowered) {
                records.push(ClassifiedRecord::Battery {
                    node_id: node_id.to_string(),
                    voltage: voltage.to_string(),
                    raw_message: payload.to_string(),
                    timestamp,
                });
            }
            return Classification::Records(records);
        }

        Classification::Discard(DiscardReason::UnroutedTopic)
    }

    fn battery_voltage<'a>(&self, payload: &'a str, lowered: &str) -> Option<&'a str> {
        if payload == "ONLINE" || payload == "OFFLINE" || lowered.contains(CONFIRMED_MARKER) {
            return None;
        }
        self.voltage
            .captures(payload)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

fn in_namespace(topic: &str, prefix: &str) -> bool {
    match topic.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Dernier segment du topic ("seismic/node-7" -> "node-7"), topic entier sinon
fn node_id_of(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}
