use crate::models::Sentiment;

/// Share of matched lexicon phrases one side needs before the text leans that way.
const DOMINANCE_RATIO: f64 = 0.7;

pub trait SentimentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Sentiment;
}

const HAPPY_WORDS: &[&str] = &[
    "happy", "joy", "love", "excited", "amazing", "fantastic", "wonderful", "awesome",
    "delight", "fun", "smile", "smiling", "cheerful", "great", "ecstatic", "grateful",
    "blessed", ":-)", ":)", ":D", "😊", "😃", "😍", "🎉", "yay", "hurray", "thrilled",
    "laugh", "laughing", "content", "pleased", "satisfied", "hopeful", "positive",
    "optimistic", "jubilant", "chipper", "blissful", "giddy", "heartwarming", "overjoyed",
    "vibrant", "uplifted", "energetic", "merry", "jovial", "sparkling", "glowing",
    "radiant", "fortunate", "fulfilled", "sunny", "peaceful", "joyful", "bubbly",
    "euphoric", "exhilarated", "lovely", "inspired", "beaming", "over the moon",
    "tickled", "elated", "in high spirits", "laughing out loud", "lighthearted",
    "dream come true", "thankful", "life is good", "cloud nine",
    "blessed and highly favored", "full of life", "rejuvenated", "carefree",
    "laughing face", "celebrate", "cheers", "good vibes", "smiley face",
    "positive energy", "feeling alive", "life is beautiful", "yay!", "happily ever after",
    "beaming with joy", "sunshine", "proud", "high on life", "floating", "pumped up",
    "smiles all around", "warm fuzzies", "cheers to that", "rejoicing", "truly blessed",
    "couldn't be happier", "heart full of joy",
];

// duplicates count as separate hits
const SAD_WORDS: &[&str] = &[
    "sad", "unhappy", "depressed", "anxious", "alone", "heartbroken", "disappointed",
    "lonely", "miserable", "melancholy", "gloomy", "hopeless", "grief", "loss", "hurt",
    "broken", "devastated", "dismal", "distressed", "downcast", "troubled", "crying",
    "tears", "upset", "sorry", "regretful", "remorseful", "😞", "😢", "😔", "💔", ":( ",
    ":'(", "defeated", "worried", "nervous", "lost", "helpless", "despair", "frustrated",
    "dissatisfied", "anxiety", "insecure", "isolated", "trauma", "burdened",
    "overwhelmed", "hurtful", "discouraged", "vulnerable", "pessimistic", "rejected",
    "betrayed", "abandoned", "alienated", "grieving", "disheartened", "feeling low",
    "suffering", "downhearted", "agony", "misery", "anguish", "pained", "dejected",
    "crying", "blue", "distraught", "regret", "guilt", "sorrow", "tearful",
    "hopelessness", "lost cause", "broken-hearted", "heartache", "forsaken", "lost hope",
    "grieving loss", "helplessness", "aching", "broken spirit", "feeling empty",
    "isolated", "crushed", "feeling down", "burden", "devastation", "low spirits",
    "disconnected", "abandoned hope", "deep sadness", "mourning", "unloved",
    "disillusioned", "discouraged",
];

/// Counts which happy and sad phrases occur in the lowercased text and lets
/// the dominant side win.
#[derive(Debug, Clone, Default)]
pub struct LexiconClassifier;

impl SentimentClassifier for LexiconClassifier {
    fn classify(&self, text: &str) -> Sentiment {
        if text.trim().is_empty() {
            return Sentiment::Neutral;
        }

        let text = text.to_lowercase();
        let happy = HAPPY_WORDS.iter().filter(|w| text.contains(**w)).count();
        let sad = SAD_WORDS.iter().filter(|w| text.contains(**w)).count();
        let total = happy + sad;
        if total == 0 {
            return Sentiment::Neutral;
        }

        if happy as f64 / total as f64 > DOMINANCE_RATIO {
            Sentiment::Positive
        } else if sad as f64 / total as f64 > DOMINANCE_RATIO {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        }
    }
}
