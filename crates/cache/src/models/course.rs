use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use lectern_model::Course;

#[derive(sqlx::FromRow)]
pub(crate) struct CourseRow {
    pub(crate) id: i64,
    pub(crate) name: String,
}
impl TryFrom<&Course> for CourseRow {
    type Error = Error;
    fn try_from(course: &Course) -> Result<Self, Self::Error> {
        Ok(Self {
            id: i64::try_from(course.id.0).or_raise(|| ErrorKind::InvalidData("course id"))?,
            name: course.display_name.clone(),
        })
    }
}
impl TryFrom<CourseRow> for Course {
    type Error = Error;
    fn try_from(row: CourseRow) -> Result<Self, Self::Error> {
        let id = u64::try_from(row.id).or_raise(|| ErrorKind::InvalidData("course id"))?;
        Ok(Course::new(id, row.name))
    }
}
