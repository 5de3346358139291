// Service-replica rank lists and pool identifiers in their wire forms.
use std::fmt;

use uuid::Uuid;

use crate::core::alloc::{try_string, try_vec};
use crate::core::error::{Error, ErrorKind};

pub type Rank = u32;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RankList {
    ranks: Vec<Rank>,
}

impl RankList {
    pub fn new(ranks: Vec<Rank>) -> Self {
        Self { ranks }
    }

    pub fn as_slice(&self) -> &[Rank] {
        &self.ranks
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn into_vec(self) -> Vec<Rank> {
        self.ranks
    }

    /// Flat wire array, order preserved.
    pub fn to_wire(&self) -> Result<Vec<u32>, Error> {
        try_vec(&self.ranks)
    }

    pub fn from_wire(reps: &[u32]) -> Result<Self, Error> {
        Ok(Self {
            ranks: try_vec(reps)?,
        })
    }
}

impl From<Vec<Rank>> for RankList {
    fn from(ranks: Vec<Rank>) -> Self {
        Self::new(ranks)
    }
}

impl fmt::Display for RankList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, rank) in self.ranks.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{rank}")?;
        }
        write!(f, "]")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PoolId(Uuid);

impl PoolId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        Uuid::parse_str(text).map(Self).map_err(|err| {
            Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("invalid pool uuid: {text}"))
                .with_source(err)
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Canonical lower-case hyphenated text owned by the caller.
    pub fn to_canonical(&self) -> Result<String, Error> {
        let mut buf = Uuid::encode_buffer();
        let text = self.0.hyphenated().encode_lower(&mut buf);
        try_string(text)
    }
}

impl From<Uuid> for PoolId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_list_wire_conversion_preserves_order() {
        let ranks = RankList::new(vec![3, 7, 9]);
        let wire = ranks.to_wire().expect("wire");
        assert_eq!(wire, vec![3, 7, 9]);
        let back = RankList::from_wire(&wire).expect("ranks");
        assert_eq!(back, ranks);
    }

    #[test]
    fn rank_list_display() {
        assert_eq!(RankList::new(vec![1, 2]).to_string(), "[1,2]");
        assert_eq!(RankList::default().to_string(), "[]");
    }

    #[test]
    fn pool_id_canonical_text_is_lowercase() {
        let pool = PoolId::parse("6F7B1C4E-0D4A-4B8E-9E52-3C1D2A5B6C7D").expect("uuid");
        assert_eq!(
            pool.to_canonical().expect("text"),
            "6f7b1c4e-0d4a-4b8e-9e52-3c1d2a5b6c7d"
        );
    }

    #[test]
    fn pool_id_rejects_garbage() {
        let err = PoolId::parse("not-a-uuid").expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
