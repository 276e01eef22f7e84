pub mod face_store;
pub mod lbph_recognizer;
