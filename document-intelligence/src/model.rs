//! Token-classification model seam and its ONNX Runtime implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use ai_service_common::lock_session;
use ndarray::Array2;
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use serde::Deserialize;
use tokenizers::Tokenizer;

use crate::error::{DocumentError, ModelLoadError};

/// Tag set of the CoNLL-03 English NER models, in model output order.
pub const CONLL03_LABELS: [&str; 9] = [
    "O", "B-MISC", "I-MISC", "B-PER", "I-PER", "B-ORG", "I-ORG", "B-LOC", "I-LOC",
];

/// Classifier output for one word-piece token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPrediction {
    /// Character offset of the token's first character in the input text.
    pub start: usize,
    /// Character offset one past the token's last character.
    pub end: usize,
    /// Highest-scoring tag (e.g., "B-PER", "O").
    pub label: String,
    /// Probability of `label`.
    pub score: f64,
}

/// A loaded token classifier.
///
/// Returns one prediction per non-special token, in text order. Shared
/// read-only across all requests.
pub trait TokenClassifier: Send + Sync {
    fn predict_tokens(&self, text: &str) -> Result<Vec<TokenPrediction>, DocumentError>;
}

/// Index to tag mapping of the classifier head.
#[derive(Debug, Clone)]
pub struct LabelMap {
    labels: Vec<String>,
}

/// The slice of HuggingFace `config.json` we care about.
#[derive(Debug, Deserialize)]
struct HfModelConfig {
    id2label: HashMap<String, String>,
}

impl LabelMap {
    pub fn conll03() -> Self {
        Self {
            labels: CONLL03_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Read `id2label` from a HuggingFace model `config.json`.
    pub fn from_config_file(path: &str) -> Result<Self, ModelLoadError> {
        let labels_error = |reason: String| ModelLoadError::Labels {
            path: path.to_string(),
            reason,
        };

        let contents = std::fs::read_to_string(path).map_err(|e| labels_error(e.to_string()))?;
        Self::from_config_json(&contents).map_err(labels_error)
    }

    fn from_config_json(contents: &str) -> Result<Self, String> {
        let config: HfModelConfig = serde_json::from_str(contents).map_err(|e| e.to_string())?;

        let mut indexed = Vec::with_capacity(config.id2label.len());
        for (id, label) in config.id2label {
            let id: usize = id
                .parse()
                .map_err(|_| format!("label id '{}' is not an integer", id))?;
            indexed.push((id, label));
        }
        indexed.sort_by_key(|(id, _)| *id);

        let size = indexed.last().map(|(id, _)| id + 1).unwrap_or(0);
        let mut labels: Vec<String> = (0..size).map(|i| format!("LABEL_{}", i)).collect();
        for (id, label) in indexed {
            labels[id] = label;
        }

        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Tag for output index `id`; unnamed indices follow the `LABEL_<id>` convention.
    pub fn name(&self, id: usize) -> String {
        self.labels
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{}", id))
    }
}

/// BERT-style token classifier backed by an ONNX Runtime session.
///
/// Texts longer than the model context are split into consecutive windows,
/// each wrapped in CLS/SEP, so offsets always refer to the full text.
pub struct OnnxTokenClassifier {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    labels: LabelMap,
    output_name: String,
    uses_token_type_ids: bool,
    cls_id: u32,
    sep_id: u32,
    window: usize,
}

impl OnnxTokenClassifier {
    pub fn load(
        model_path: &str,
        tokenizer_path: &str,
        labels: LabelMap,
        max_sequence_length: usize,
    ) -> Result<Self, ModelLoadError> {
        tracing::info!("Loading NER model from: {}", model_path);

        if !Path::new(model_path).exists() {
            return Err(ModelLoadError::NotFound(model_path.to_string()));
        }

        let mut tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| ModelLoadError::Tokenizer(e.to_string()))?;
        // Windowing is done here; the tokenizer must hand back every token.
        tokenizer
            .with_truncation(None)
            .map_err(|e| ModelLoadError::Tokenizer(e.to_string()))?;
        tokenizer.with_padding(None);

        let cls_id = tokenizer
            .token_to_id("[CLS]")
            .ok_or_else(|| ModelLoadError::Tokenizer("vocabulary has no [CLS] token".to_string()))?;
        let sep_id = tokenizer
            .token_to_id("[SEP]")
            .ok_or_else(|| ModelLoadError::Tokenizer("vocabulary has no [SEP] token".to_string()))?;

        let session = Session::builder()
            .map_err(|e| ModelLoadError::Runtime(format!("session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ModelLoadError::Runtime(format!("optimization level: {}", e)))?
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .map_err(|e| ModelLoadError::Runtime(format!("execution providers: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| ModelLoadError::Runtime(e.to_string()))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ModelLoadError::Runtime("model defines no outputs".to_string()))?;
        let uses_token_type_ids = session.inputs.iter().any(|i| i.name == "token_type_ids");

        tracing::info!(
            "NER model loaded successfully ({} labels, window {} tokens)",
            labels.len(),
            max_sequence_length
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            labels,
            output_name,
            uses_token_type_ids,
            cls_id,
            sep_id,
            window: max_sequence_length.saturating_sub(2).max(1),
        })
    }
}

impl TokenClassifier for OnnxTokenClassifier {
    fn predict_tokens(&self, text: &str) -> Result<Vec<TokenPrediction>, DocumentError> {
        let encoding = self
            .tokenizer
            .encode_char_offsets(text, false)
            .map_err(|e| DocumentError::Inference(format!("tokenization failed: {}", e)))?;

        let ids = encoding.get_ids();
        let offsets = encoding.get_offsets();
        let special = encoding.get_special_tokens_mask();

        let mut session = lock_session(&self.session);

        let mut predictions = Vec::with_capacity(ids.len());
        for (first, input_ids) in window_inputs(ids, self.window, self.cls_id, self.sep_id) {
            let length = input_ids.len();
            let to_tensor = |values: Vec<i64>| {
                Array2::from_shape_vec((1, length), values)
                    .map_err(|e| DocumentError::Inference(format!("array error: {}", e)))
                    .and_then(|array| {
                        Tensor::from_array(array)
                            .map_err(|e| DocumentError::Inference(format!("tensor error: {}", e)))
                    })
            };
            let input_ids = to_tensor(input_ids)?;
            let attention_mask = to_tensor(vec![1; length])?;

            let inputs = if self.uses_token_type_ids {
                ort::inputs! {
                    "input_ids" => input_ids,
                    "attention_mask" => attention_mask,
                    "token_type_ids" => to_tensor(vec![0; length])?
                }
            } else {
                ort::inputs! {
                    "input_ids" => input_ids,
                    "attention_mask" => attention_mask
                }
            };

            let outputs = session
                .run(inputs)
                .map_err(|e| DocumentError::Inference(e.to_string()))?;
            let output = outputs
                .get(&self.output_name)
                .ok_or_else(|| DocumentError::Inference("model produced no output".to_string()))?;
            let (shape, logits) = output
                .try_extract_tensor::<f32>()
                .map_err(|e| DocumentError::Inference(format!("extract error: {}", e)))?;

            let num_labels = shape
                .last()
                .and_then(|&n| usize::try_from(n).ok())
                .unwrap_or(0);
            predictions.extend(window_predictions(
                first,
                length,
                logits,
                num_labels,
                offsets,
                special,
                &self.labels,
            )?);
        }

        Ok(predictions)
    }
}

/// Split token ids into windows of at most `window` tokens, each wrapped in
/// CLS and SEP. Every window comes with the index of its first token.
pub fn window_inputs(ids: &[u32], window: usize, cls_id: u32, sep_id: u32) -> Vec<(usize, Vec<i64>)> {
    let window = window.max(1);
    ids.chunks(window)
        .enumerate()
        .map(|(index, chunk)| {
            let mut input = Vec::with_capacity(chunk.len() + 2);
            input.push(i64::from(cls_id));
            input.extend(chunk.iter().map(|&id| i64::from(id)));
            input.push(i64::from(sep_id));
            (index * window, input)
        })
        .collect()
}

/// Map the logits of one window back to token predictions.
///
/// `length` counts the window's positions including CLS and SEP; `first` is
/// the index of the window's first real token in `offsets` and `special`.
/// Special tokens and tokens with an empty character span are skipped.
pub fn window_predictions(
    first: usize,
    length: usize,
    logits: &[f32],
    num_labels: usize,
    offsets: &[(usize, usize)],
    special: &[u32],
    labels: &LabelMap,
) -> Result<Vec<TokenPrediction>, DocumentError> {
    if length < 2 || num_labels == 0 || logits.len() != length * num_labels {
        return Err(DocumentError::Inference(format!(
            "unexpected output of {} logits for {} positions and {} labels",
            logits.len(),
            length,
            num_labels
        )));
    }

    let tokens = length - 2;
    if first + tokens > offsets.len().min(special.len()) {
        return Err(DocumentError::Inference(format!(
            "window {}..{} outside encoding of {} tokens",
            first,
            first + tokens,
            offsets.len()
        )));
    }

    let mut predictions = Vec::with_capacity(tokens);
    // Position 0 is CLS and position length - 1 is SEP.
    for (position, token_logits) in logits.chunks(num_labels).enumerate().take(length - 1).skip(1) {
        let token = first + position - 1;
        let (start, end) = offsets[token];
        if special[token] == 1 || start >= end {
            continue;
        }

        let (best, score) = best_label(token_logits);
        predictions.push(TokenPrediction {
            start,
            end,
            label: labels.name(best),
            score,
        });
    }

    Ok(predictions)
}

/// Argmax of the softmax over one token's logits, with its probability.
pub fn best_label(logits: &[f32]) -> (usize, f64) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&l| (l as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();

    let (best, top) = exps
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, top), (i, &e)| {
            if e > top {
                (i, e)
            } else {
                (best, top)
            }
        });

    (best, top / sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_label() {
        let (best, score) = best_label(&[0.0, 3.0, 1.0]);
        assert_eq!(best, 1);
        let expected = 3.0f64.exp() / (1.0 + 3.0f64.exp() + 1.0f64.exp());
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_best_label_tie_prefers_first() {
        let (best, score) = best_label(&[2.0, 2.0]);
        assert_eq!(best, 0);
        assert!((score - 0.5).abs() < 1e-12);
    }

    const CLS: u32 = 101;
    const SEP: u32 = 102;

    /// One-hot logits over the CoNLL-03 tags for each position.
    fn logits_for(tags: &[usize]) -> Vec<f32> {
        tags.iter()
            .flat_map(|&tag| (0..CONLL03_LABELS.len()).map(move |i| if i == tag { 8.0 } else { 0.0 }))
            .collect()
    }

    #[test]
    fn test_window_inputs_exact_window() {
        let windows = window_inputs(&[7, 8, 9], 3, CLS, SEP);
        assert_eq!(windows, vec![(0, vec![101, 7, 8, 9, 102])]);
    }

    #[test]
    fn test_window_inputs_one_past_window() {
        let windows = window_inputs(&[7, 8, 9, 10], 3, CLS, SEP);
        assert_eq!(
            windows,
            vec![(0, vec![101, 7, 8, 9, 102]), (3, vec![101, 10, 102])]
        );
    }

    #[test]
    fn test_window_inputs_single_and_empty() {
        assert_eq!(window_inputs(&[42], 510, CLS, SEP), vec![(0, vec![101, 42, 102])]);
        assert!(window_inputs(&[], 510, CLS, SEP).is_empty());
    }

    #[test]
    fn test_window_predictions_single_token() {
        let labels = LabelMap::conll03();
        // CLS, "Paris", SEP
        let logits = logits_for(&[0, 7, 0]);

        let predictions = window_predictions(0, 3, &logits, 9, &[(0, 5)], &[0], &labels).unwrap();

        assert_eq!(predictions.len(), 1);
        assert_eq!((predictions[0].start, predictions[0].end), (0, 5));
        assert_eq!(predictions[0].label, "B-LOC");
        assert!(predictions[0].score > 0.99);
    }

    #[test]
    fn test_window_predictions_second_window_maps_offsets() {
        let labels = LabelMap::conll03();
        // "Ana Lopez met Bo" in windows of 3 tokens: [Ana Lopez met] [Bo]
        let offsets = [(0, 3), (4, 9), (10, 13), (14, 16)];
        let special = [0, 0, 0, 0];

        let first = window_predictions(0, 5, &logits_for(&[0, 3, 4, 0, 0]), 9, &offsets, &special, &labels)
            .unwrap();
        let second = window_predictions(3, 3, &logits_for(&[0, 3, 0]), 9, &offsets, &special, &labels).unwrap();

        let tagged: Vec<(usize, usize, &str)> = first
            .iter()
            .chain(second.iter())
            .map(|p| (p.start, p.end, p.label.as_str()))
            .collect();
        assert_eq!(
            tagged,
            vec![(0, 3, "B-PER"), (4, 9, "I-PER"), (10, 13, "O"), (14, 16, "B-PER")]
        );
    }

    #[test]
    fn test_window_predictions_skips_special_and_empty_spans() {
        let labels = LabelMap::conll03();
        let offsets = [(0, 3), (3, 3), (4, 8), (8, 8)];
        let special = [0, 1, 0, 0];

        let predictions =
            window_predictions(0, 6, &logits_for(&[0, 5, 5, 6, 0, 0]), 9, &offsets, &special, &labels).unwrap();

        let spans: Vec<(usize, usize)> = predictions.iter().map(|p| (p.start, p.end)).collect();
        assert_eq!(spans, vec![(0, 3), (4, 8)]);
        assert_eq!(predictions[1].label, "I-ORG");
    }

    #[test]
    fn test_window_predictions_rejects_mismatched_logits() {
        let labels = LabelMap::conll03();
        let offsets = [(0, 3), (4, 9)];
        let special = [0, 0];

        // One position short.
        let short = logits_for(&[0, 3, 4]);
        assert!(matches!(
            window_predictions(0, 4, &short, 9, &offsets, &special, &labels),
            Err(DocumentError::Inference(_))
        ));
        // No label dimension.
        assert!(window_predictions(0, 4, &[], 0, &offsets, &special, &labels).is_err());
        // Window runs past the encoding.
        assert!(window_predictions(1, 4, &logits_for(&[0, 3, 4, 0]), 9, &offsets, &special, &labels).is_err());
    }

    #[test]
    fn test_conll03_labels() {
        let labels = LabelMap::conll03();
        assert_eq!(labels.len(), 9);
        assert_eq!(labels.name(0), "O");
        assert_eq!(labels.name(3), "B-PER");
        assert_eq!(labels.name(42), "LABEL_42");
    }

    #[test]
    fn test_label_map_from_config_json() {
        let json = r#"{
            "architectures": ["BertForTokenClassification"],
            "id2label": { "0": "O", "2": "I-PER", "1": "B-PER" },
            "label2id": { "O": 0, "B-PER": 1, "I-PER": 2 }
        }"#;

        let labels = LabelMap::from_config_json(json).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.name(1), "B-PER");
        assert_eq!(labels.name(2), "I-PER");
    }

    #[test]
    fn test_label_map_fills_gaps() {
        let labels = LabelMap::from_config_json(r#"{ "id2label": { "0": "O", "3": "EMAIL" } }"#).unwrap();
        assert_eq!(labels.len(), 4);
        assert_eq!(labels.name(1), "LABEL_1");
        assert_eq!(labels.name(3), "EMAIL");
    }

    #[test]
    fn test_label_map_rejects_bad_ids() {
        assert!(LabelMap::from_config_json(r#"{ "id2label": { "zero": "O" } }"#).is_err());
        assert!(LabelMap::from_config_json("not json").is_err());
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxTokenClassifier::load(
            "/nonexistent/model.onnx",
            "/nonexistent/tokenizer.json",
            LabelMap::conll03(),
            512,
        )
        .err()
        .unwrap();
        assert!(matches!(err, ModelLoadError::NotFound(_)));
    }
}
