use super::particle::ParticleRecord;

/// A spatially contiguous group of deduplicated particles.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub patch_id: u32,
    pub members: Vec<ParticleRecord>,
}

impl Patch {
    pub fn new(patch_id: u32, members: Vec<ParticleRecord>) -> Self {
        Self { patch_id, members }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
