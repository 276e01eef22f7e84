pub mod face_crop;
pub mod face_recognizer;
pub mod label_registry;
pub mod vote_stabilizer;
