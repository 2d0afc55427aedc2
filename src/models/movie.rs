use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{GenreId, MovieId};

/// Movie reference data. Loaded once at start-up and never mutated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Movie {
    pub movie_id: MovieId,
    pub title: String,
    #[serde(default)]
    pub genre_ids: Vec<GenreId>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub poster_url: Option<String>,
}

impl Movie {
    pub fn has_genre(&self, genre_id: GenreId) -> bool {
        self.genre_ids.contains(&genre_id)
    }
}

/// Immutable movie catalog ordered by ascending `movie_id`
#[derive(Debug, Default)]
pub struct MovieCatalog {
    movies: Vec<Movie>,
    index: HashMap<MovieId, usize>,
}

impl MovieCatalog {
    /// Builds a catalog; a later duplicate `movie_id` replaces an earlier one.
    pub fn new(movies: impl IntoIterator<Item = Movie>) -> Self {
        let mut by_id: HashMap<MovieId, Movie> = HashMap::new();
        for movie in movies {
            by_id.insert(movie.movie_id, movie);
        }

        let mut movies: Vec<Movie> = by_id.into_values().collect();
        movies.sort_by_key(|m| m.movie_id);

        let index = movies
            .iter()
            .enumerate()
            .map(|(i, m)| (m.movie_id, i))
            .collect();

        Self { movies, index }
    }

    pub fn get(&self, movie_id: MovieId) -> Option<&Movie> {
        self.index.get(&movie_id).map(|&i| &self.movies[i])
    }

    pub fn contains(&self, movie_id: MovieId) -> bool {
        self.index.contains_key(&movie_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Movie> {
        self.movies.iter()
    }

    /// Movies matching `genre`, or every movie when no genre is given
    pub fn filtered(&self, genre: Option<GenreId>) -> impl Iterator<Item = &Movie> {
        self.movies
            .iter()
            .filter(move |m| genre.map_or(true, |g| m.has_genre(g)))
    }

    pub fn len(&self) -> usize {
        self.movies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }
}
