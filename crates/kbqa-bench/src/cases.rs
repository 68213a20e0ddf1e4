//! Benchmark cases and reference ground truth.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_GROUND_TRUTH_FACTS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkCase {
    pub question: String,
    pub ground_truth: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_facts: Vec<String>,
    /// True when the correct behavior is (at least partly) a refusal.
    #[serde(default)]
    pub refusal_expected: bool,
}

impl BenchmarkCase {
    pub fn new(question: impl Into<String>, ground_truth: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ground_truth: ground_truth.into(),
            description: String::new(),
            key_facts: Vec::new(),
            refusal_expected: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_key_facts<I, S>(mut self, facts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_facts = facts.into_iter().map(Into::into).collect();
        self
    }

    pub fn expecting_refusal(mut self) -> Self {
        self.refusal_expected = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundTruthStyle {
    /// The canonical answer only.
    #[default]
    Concise,
    /// Canonical answer plus a `Key facts:` list.
    Rich,
}

impl GroundTruthStyle {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "concise" => Some(Self::Concise),
            "rich" => Some(Self::Rich),
            _ => None,
        }
    }
}

/// Reference text the responses are scored against.
pub fn reference_ground_truth(
    case: &BenchmarkCase,
    style: GroundTruthStyle,
    max_facts: usize,
) -> String {
    let base = case.ground_truth.trim().to_string();
    if style == GroundTruthStyle::Concise {
        return base;
    }
    let facts: Vec<&str> = case
        .key_facts
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .take(max_facts)
        .collect();
    if facts.is_empty() {
        return base;
    }
    let mut out = base;
    out.push_str("\n\nKey facts:");
    for fact in facts {
        out.push_str("\n- ");
        out.push_str(fact);
    }
    out
}

/// The built-in comparison set: simple and biographical facts, fictional
/// entities, real/fictional mixes and a time-bound question.
pub fn default_cases() -> Vec<BenchmarkCase> {
    vec![
        BenchmarkCase::new(
            "Who is Albert Einstein?",
            "Albert Einstein was a German-born theoretical physicist who developed the theories \
             of special and general relativity. He received the 1921 Nobel Prize in Physics for \
             his explanation of the photoelectric effect. He was born on 14 March 1879 in Ulm and \
             died on 18 April 1955 in Princeton, New Jersey.",
        )
        .with_description("Basic biographical question about a well-known scientist")
        .with_key_facts([
            "Born on 14 March 1879 in Ulm",
            "Died on 18 April 1955 in Princeton, New Jersey",
            "Received the 1921 Nobel Prize in Physics",
            "Developed special and general relativity",
        ]),
        BenchmarkCase::new(
            "When was Marie Curie born and what were her major achievements?",
            "Marie Curie was born on 7 November 1867 in Warsaw. She discovered the elements \
             polonium and radium, developed the theory of radioactivity, and received the 1903 \
             Nobel Prize in Physics and the 1911 Nobel Prize in Chemistry.",
        )
        .with_description("Specific biographical facts with dates")
        .with_key_facts([
            "Born on 7 November 1867 in Warsaw",
            "Discovered polonium and radium",
            "1903 Nobel Prize in Physics",
            "1911 Nobel Prize in Chemistry",
            "First person to win two Nobel Prizes",
        ]),
        BenchmarkCase::new(
            "What is the capital of France?",
            "Paris is the capital and largest city of France.",
        )
        .with_description("Simple geographic fact")
        .with_key_facts(["Paris is the capital of France"]),
        BenchmarkCase::new(
            "What is the relationship between Alan Turing and Dr. Helena Vargass?",
            "There is no real-world relationship between Alan Turing and Dr. Helena Vargass. \
             Alan Turing was a British mathematician, logician and computer scientist, while \
             Dr. Helena Vargass is not a real person.",
        )
        .with_description("Mix of real and fictional entity")
        .with_key_facts([
            "Alan Turing was a British mathematician and computer scientist",
            "Dr. Helena Vargass cannot be verified as a real person",
        ])
        .expecting_refusal(),
        BenchmarkCase::new(
            "Tell me about the collaboration between Dr. Liora Anstrum and Prof. Armin Delacroix.",
            "There is no real-world collaboration between Dr. Liora Anstrum and Prof. Armin \
             Delacroix; neither can be verified as a real person.",
        )
        .with_description("Entirely fictional entities")
        .expecting_refusal(),
        BenchmarkCase::new(
            "Describe the joint research between Einstein, Bohr, and Dr. Selwyn Hartmere on quantum mechanics.",
            "There was no joint research between Albert Einstein, Niels Bohr, and Dr. Selwyn \
             Hartmere; Dr. Selwyn Hartmere is not a real person. Einstein and Bohr debated the \
             foundations of quantum mechanics rather than conducting joint research. Niels Bohr \
             was born on 7 October 1885 in Copenhagen and received the 1922 Nobel Prize in Physics.",
        )
        .with_description("Real scientists mixed with a fictional one")
        .with_key_facts([
            "Einstein and Bohr debated quantum mechanics at the Solvay Conferences",
            "Niels Bohr was born on 7 October 1885",
            "Niels Bohr received the 1922 Nobel Prize in Physics",
            "Dr. Selwyn Hartmere cannot be verified as a real person",
        ])
        .expecting_refusal(),
        BenchmarkCase::new(
            "Compare the contributions of Ada Lovelace and Charles Babbage to computing.",
            "Charles Babbage designed the Difference Engine and the Analytical Engine. Ada \
             Lovelace wrote notes on the Analytical Engine including an algorithm for computing \
             Bernoulli numbers, widely regarded as the first published computer program.",
        )
        .with_description("Comparison of two related historical figures")
        .with_key_facts([
            "Babbage designed the Analytical Engine",
            "Lovelace published an algorithm for Bernoulli numbers",
            "Ada Lovelace was born on 10 December 1815",
            "Charles Babbage was born on 26 December 1791",
        ]),
        BenchmarkCase::new(
            "What organization did Alan Turing work for during World War II?",
            "During World War II, Alan Turing worked for the Government Code and Cypher School \
             at Bletchley Park.",
        )
        .with_description("Time-bound historical fact")
        .with_key_facts([
            "Government Code and Cypher School (GC&CS)",
            "Located at Bletchley Park",
        ]),
    ]
}
