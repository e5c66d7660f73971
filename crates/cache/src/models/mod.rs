mod course;
mod resource;

pub(crate) use self::course::CourseRow;
pub(crate) use self::resource::ResourceRow;
