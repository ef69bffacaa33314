use serde::{Deserialize, Serialize};

use super::tag::TagId;

/// Association of a tag with a song on the media volume.
///
/// `song` is a file name inside the music directory, or a path starting
/// with `/` relative to the root of the media volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(with = "tag_id_string")]
    pub uid: TagId,
    pub song: String,
}

impl Link {
    pub fn new(uid: TagId, song: impl Into<String>) -> Self {
        Self {
            uid,
            song: song.into(),
        }
    }
}

mod tag_id_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use crate::domain::tag::TagId;

    pub fn serialize<S: Serializer>(id: &TagId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(id.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TagId, D::Error> {
        let text = String::deserialize(deserializer)?;
        TagId::parse(&text).map_err(D::Error::custom)
    }
}
